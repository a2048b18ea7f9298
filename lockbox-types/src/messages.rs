//! Protocol messages for Lockbox.
//!
//! Every request kind has exactly one response kind. Failures are always
//! structured: a `success` flag plus, where authentication is involved, a
//! dedicated flag (`wrong_key`, `password_correct`, `email_taken`) so clients
//! can tell a rejected key from an unknown server failure.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::{ItemId, Key};

/// Discriminator shared by a request and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestKind {
    /// Create a user account
    Signup = 1,
    /// Authenticate as a user
    Login = 2,
    /// Read own account plus the user directory
    Fetch = 3,
    /// Overwrite own private info and message queue
    Push = 4,
    /// Deliver a message to another user
    Send = 5,
    /// Read an item
    ItemFetch = 6,
    /// Create an item
    CreateItem = 7,
    /// Prefix-transform an item's contents
    EncryptItem = 8,
    /// Attach a release key to an item
    ReleaseItem = 9,
    /// Set own public key and description
    SetProfile = 10,
    /// Delete own account
    DeleteUser = 11,
    /// Delete an item
    DeleteItem = 12,
}

impl RequestKind {
    /// All kinds, in discriminator order.
    pub const ALL: [RequestKind; 12] = [
        RequestKind::Signup,
        RequestKind::Login,
        RequestKind::Fetch,
        RequestKind::Push,
        RequestKind::Send,
        RequestKind::ItemFetch,
        RequestKind::CreateItem,
        RequestKind::EncryptItem,
        RequestKind::ReleaseItem,
        RequestKind::SetProfile,
        RequestKind::DeleteUser,
        RequestKind::DeleteItem,
    ];

    /// Stable lowercase name, used for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Signup => "signup",
            RequestKind::Login => "login",
            RequestKind::Fetch => "fetch",
            RequestKind::Push => "push",
            RequestKind::Send => "send",
            RequestKind::ItemFetch => "item_fetch",
            RequestKind::CreateItem => "create_item",
            RequestKind::EncryptItem => "encrypt_item",
            RequestKind::ReleaseItem => "release_item",
            RequestKind::SetProfile => "set_profile",
            RequestKind::DeleteUser => "delete_user",
            RequestKind::DeleteItem => "delete_item",
        }
    }
}

/// All client-to-server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create a user account
    Signup(SignupRequest),
    /// Authenticate as a user
    Login(LoginRequest),
    /// Read own account plus the user directory
    Fetch,
    /// Overwrite own private info and message queue
    Push(PushRequest),
    /// Deliver a message to another user
    Send(SendRequest),
    /// Read an item
    ItemFetch(ItemFetchRequest),
    /// Create an item
    CreateItem(CreateItemRequest),
    /// Prefix-transform an item's contents
    EncryptItem(EncryptItemRequest),
    /// Attach a release key to an item
    ReleaseItem(ReleaseItemRequest),
    /// Set own public key and description
    SetProfile(SetProfileRequest),
    /// Delete own account
    DeleteUser(DeleteUserRequest),
    /// Delete an item
    DeleteItem(DeleteItemRequest),
}

impl Request {
    /// The kind of this request.
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Signup(_) => RequestKind::Signup,
            Request::Login(_) => RequestKind::Login,
            Request::Fetch => RequestKind::Fetch,
            Request::Push(_) => RequestKind::Push,
            Request::Send(_) => RequestKind::Send,
            Request::ItemFetch(_) => RequestKind::ItemFetch,
            Request::CreateItem(_) => RequestKind::CreateItem,
            Request::EncryptItem(_) => RequestKind::EncryptItem,
            Request::ReleaseItem(_) => RequestKind::ReleaseItem,
            Request::SetProfile(_) => RequestKind::SetProfile,
            Request::DeleteUser(_) => RequestKind::DeleteUser,
            Request::DeleteItem(_) => RequestKind::DeleteItem,
        }
    }
}

/// All server-to-client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Answer to [`Request::Signup`]
    Signup(SignupResponse),
    /// Answer to [`Request::Login`]
    Login(LoginResponse),
    /// Answer to [`Request::Fetch`]
    Fetch(FetchResponse),
    /// Answer to [`Request::Push`]
    Push(PushResponse),
    /// Answer to [`Request::Send`]
    Send(SendResponse),
    /// Answer to [`Request::ItemFetch`]
    ItemFetch(ItemFetchResponse),
    /// Answer to [`Request::CreateItem`]
    CreateItem(CreateItemResponse),
    /// Answer to [`Request::EncryptItem`]
    EncryptItem(EncryptItemResponse),
    /// Answer to [`Request::ReleaseItem`]
    ReleaseItem(ReleaseItemResponse),
    /// Answer to [`Request::SetProfile`]
    SetProfile(SetProfileResponse),
    /// Answer to [`Request::DeleteUser`]
    DeleteUser(DeleteUserResponse),
    /// Answer to [`Request::DeleteItem`]
    DeleteItem(DeleteItemResponse),
}

impl Response {
    /// The kind of request this responds to.
    pub fn kind(&self) -> RequestKind {
        match self {
            Response::Signup(_) => RequestKind::Signup,
            Response::Login(_) => RequestKind::Login,
            Response::Fetch(_) => RequestKind::Fetch,
            Response::Push(_) => RequestKind::Push,
            Response::Send(_) => RequestKind::Send,
            Response::ItemFetch(_) => RequestKind::ItemFetch,
            Response::CreateItem(_) => RequestKind::CreateItem,
            Response::EncryptItem(_) => RequestKind::EncryptItem,
            Response::ReleaseItem(_) => RequestKind::ReleaseItem,
            Response::SetProfile(_) => RequestKind::SetProfile,
            Response::DeleteUser(_) => RequestKind::DeleteUser,
            Response::DeleteItem(_) => RequestKind::DeleteItem,
        }
    }

    /// The generic-failure response for a request kind.
    ///
    /// Every flag is false and every payload empty: "unknown server failure",
    /// distinct from an authentication rejection.
    pub fn failure(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Signup => Response::Signup(Default::default()),
            RequestKind::Login => Response::Login(Default::default()),
            RequestKind::Fetch => Response::Fetch(Default::default()),
            RequestKind::Push => Response::Push(Default::default()),
            RequestKind::Send => Response::Send(Default::default()),
            RequestKind::ItemFetch => Response::ItemFetch(Default::default()),
            RequestKind::CreateItem => Response::CreateItem(Default::default()),
            RequestKind::EncryptItem => Response::EncryptItem(Default::default()),
            RequestKind::ReleaseItem => Response::ReleaseItem(Default::default()),
            RequestKind::SetProfile => Response::SetProfile(Default::default()),
            RequestKind::DeleteUser => Response::DeleteUser(Default::default()),
            RequestKind::DeleteItem => Response::DeleteItem(Default::default()),
        }
    }

    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        match self {
            Response::Signup(r) => r.success,
            Response::Login(r) => r.success,
            Response::Fetch(r) => r.success,
            Response::Push(r) => r.success,
            Response::Send(r) => r.success,
            Response::ItemFetch(r) => r.success,
            Response::CreateItem(r) => r.success,
            Response::EncryptItem(r) => r.success,
            Response::ReleaseItem(r) => r.success,
            Response::SetProfile(r) => r.success,
            Response::DeleteUser(r) => r.success,
            Response::DeleteItem(r) => r.success,
        }
    }

    /// Whether the request was rejected because the supplied key was wrong.
    ///
    /// Exact for item requests, which carry `wrong_key`. For Login and
    /// DeleteUser it is also true of any generic failure; see
    /// [`LoginResponse`].
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Response::Login(r) => !r.success && !r.password_correct,
            Response::DeleteUser(r) => !r.success && !r.password_correct,
            Response::ItemFetch(r) => r.wrong_key,
            Response::EncryptItem(r) => r.wrong_key,
            Response::ReleaseItem(r) => r.wrong_key,
            Response::DeleteItem(r) => r.wrong_key,
            _ => false,
        }
    }
}

/// Create a new user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupRequest {
    /// Address to sign up as
    pub email: String,
    /// Client-derived auth key; the server stores only its hash
    pub auth_key: Key,
}

/// Result of a signup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupResponse {
    /// Whether the account was created
    pub success: bool,
    /// Set when the address already belongs to an account
    pub email_taken: bool,
}

/// Log in as an existing user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Address to log in as
    pub email: String,
    /// Client-derived auth key
    pub auth_key: Key,
}

/// Result of a login.
///
/// `{success: false, password_correct: false}` is also what a throttled,
/// malformed or internally failed login gets, since the schema has no
/// separate failure flag. Clients must not read it as a definite wrong key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Whether the connection is now logged in
    pub success: bool,
    /// Whether the key matched. May be true while `success` is false when the
    /// server failed for another reason.
    pub password_correct: bool,
}

/// Own account state plus the public user directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Whether the fetch succeeded
    pub success: bool,
    /// Own private info (client-defined ciphertext)
    pub private_info: ByteBuf,
    /// Messages waiting for this user, oldest first
    pub messages: Vec<ByteBuf>,
    /// Every user's email
    pub all_user_emails: Vec<String>,
    /// Every user's description, aligned with `all_user_emails`
    pub all_user_descriptions: Vec<String>,
    /// Every user's public key, aligned with `all_user_emails`
    pub all_user_public_keys: Vec<Key>,
}

/// Replace own private info and message queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// New private info (client-defined ciphertext)
    pub private_info: ByteBuf,
    /// New message queue, usually empty once the client has folded messages
    /// into `private_info`
    pub messages: Vec<ByteBuf>,
}

/// Result of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Whether the push was stored; resend if not
    pub success: bool,
}

/// Deliver a small message to another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Recipient address
    pub target_email: String,
    /// Ciphertext under the recipient's public key; size-limited by the server
    pub content: ByteBuf,
}

/// Result of a send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// Whether the message was queued; resend if not
    pub success: bool,
}

/// Read an item's contents and live release keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFetchRequest {
    /// Item to read
    pub item_id: ItemId,
    /// Item auth key
    pub auth_key: Key,
}

/// Result of an item fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFetchResponse {
    /// Whether the item was read
    pub success: bool,
    /// Set when the auth key was rejected
    pub wrong_key: bool,
    /// Item ciphertext; may be megabytes
    pub contents: ByteBuf,
    /// Info of every unexpired release key
    pub release_key_infos: Vec<ByteBuf>,
}

/// Create a new item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItemRequest {
    /// Item ciphertext
    pub contents: ByteBuf,
    /// Key that will gate every later access
    pub auth_key: Key,
}

/// Result of item creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItemResponse {
    /// Whether the item was created
    pub success: bool,
    /// Server-allocated id, present on success
    pub item_id: Option<ItemId>,
}

/// Replace an item's contents with `prefix || contents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptItemRequest {
    /// Item to transform
    pub item_id: ItemId,
    /// Item auth key
    pub auth_key: Key,
    /// Public key the client associates with the transform
    pub public_key: Key,
    /// Bytes to prepend to the stored contents
    pub prefix: ByteBuf,
}

/// Result of an encrypt-item transform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptItemResponse {
    /// Whether the contents were replaced
    pub success: bool,
    /// Set when the auth key was rejected
    pub wrong_key: bool,
}

/// Release one share of an item's multi-party lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseItemRequest {
    /// Item to release
    pub item_id: ItemId,
    /// Item auth key
    pub auth_key: Key,
    /// Release info (client-defined ciphertext)
    pub info: ByteBuf,
    /// Unix timestamp (seconds) after which the server drops the release key
    pub expires: i64,
}

/// Result of a release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseItemResponse {
    /// Whether the release key was stored
    pub success: bool,
    /// Set when the auth key was rejected
    pub wrong_key: bool,
}

/// Set own public key and public description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetProfileRequest {
    /// Key others encrypt messages to this user with
    pub public_key: Key,
    /// Public plaintext description
    pub description: String,
}

/// Result of a profile update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetProfileResponse {
    /// Whether the profile was stored
    pub success: bool,
}

/// Delete the logged-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    /// Account auth key, checked again before deletion
    pub auth_key: Key,
}

/// Result of account deletion.
///
/// Like [`LoginResponse`], a generic failure is indistinguishable from a
/// wrong key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUserResponse {
    /// Whether the account is gone
    pub success: bool,
    /// Whether the key matched; false on any failure
    pub password_correct: bool,
}

/// Delete an item and its release keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItemRequest {
    /// Item to delete
    pub item_id: ItemId,
    /// Item auth key
    pub auth_key: Key,
}

/// Result of item deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItemResponse {
    /// Whether the item is gone
    pub success: bool,
    /// Set when the auth key was rejected
    pub wrong_key: bool,
}
