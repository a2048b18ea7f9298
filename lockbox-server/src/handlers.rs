//! Request handlers.
//!
//! Each request kind maps onto one or two storage operations. Handlers run on
//! a worker task, see the connection's bound email by value, and hand back the
//! response together with any change to that binding.

use crate::error::{ProtocolError, ProtocolResult, StorageError};
use crate::server::Gateway;
use crate::storage::{current_timestamp, Item, ReleaseKey, User};
use lockbox_types::{
    ByteBuf, CreateItemRequest, CreateItemResponse, DeleteItemRequest, DeleteItemResponse,
    DeleteUserRequest, DeleteUserResponse, Email, EncryptItemRequest, EncryptItemResponse,
    FetchResponse, ItemFetchRequest, ItemFetchResponse, ItemId, Key, KeyHash, LoginRequest, LoginResponse,
    PushRequest, PushResponse, ReleaseItemRequest, ReleaseItemResponse, Request, Response,
    SendRequest, SendResponse, SetProfileRequest, SetProfileResponse, SignupRequest,
    SignupResponse,
};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

/// How a handled request changes the connection's login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Leave the session as it was.
    Keep,
    /// Bind the session to this user.
    Bind(Email),
    /// Drop the session's user.
    Unbind,
}

/// A response plus its effect on the session.
#[derive(Debug)]
pub struct Outcome {
    /// Response to write back.
    pub response: Response,
    /// Session change to apply before the next request.
    pub binding: Binding,
}

impl Outcome {
    fn keep(response: Response) -> Self {
        Self {
            response,
            binding: Binding::Keep,
        }
    }
}

/// Handle one request on behalf of a connection logged in as `session`.
///
/// Authentication rejections are ordinary responses. Anything returned as
/// `Err` is turned into the generic failure for the request kind by the
/// caller.
pub async fn handle_request(
    gateway: &Gateway,
    session: Option<Email>,
    request: Request,
) -> ProtocolResult<Outcome> {
    gateway.metrics().record_request(request.kind());

    match request {
        Request::Signup(req) => signup(gateway, req).await,
        Request::Login(req) => login(gateway, req).await,
        Request::Fetch => fetch(gateway, logged_in(session)?).await.map(Outcome::keep),
        Request::Push(req) => push(gateway, logged_in(session)?, req)
            .await
            .map(Outcome::keep),
        Request::Send(req) => send(gateway, logged_in(session)?, req)
            .await
            .map(Outcome::keep),
        Request::ItemFetch(req) => item_fetch(gateway, req).await.map(Outcome::keep),
        Request::CreateItem(req) => create_item(gateway, req).await.map(Outcome::keep),
        Request::EncryptItem(req) => encrypt_item(gateway, req).await.map(Outcome::keep),
        Request::ReleaseItem(req) => release_item(gateway, req).await.map(Outcome::keep),
        Request::SetProfile(req) => set_profile(gateway, logged_in(session)?, req)
            .await
            .map(Outcome::keep),
        Request::DeleteUser(req) => delete_user(gateway, logged_in(session)?, req).await,
        Request::DeleteItem(req) => delete_item(gateway, req).await.map(Outcome::keep),
    }
}

fn logged_in(session: Option<Email>) -> ProtocolResult<Email> {
    session.ok_or(ProtocolError::NotAuthenticated)
}

fn parse_email(value: &str) -> ProtocolResult<Email> {
    Email::parse(value).map_err(|e| ProtocolError::InvalidMessage(e.into()))
}

async fn signup(gateway: &Gateway, req: SignupRequest) -> ProtocolResult<Outcome> {
    let SignupRequest { email, auth_key } = req;
    let email = parse_email(&email)?;
    let auth_key_hash = gateway.hash_key(auth_key).await?;

    match gateway
        .storage()
        .insert_user(&User::new(email.clone(), auth_key_hash), false)
        .await
    {
        Ok(()) => {
            info!(%email, "user signed up");
            Ok(Outcome {
                response: Response::Signup(SignupResponse {
                    success: true,
                    email_taken: false,
                }),
                binding: Binding::Bind(email),
            })
        }
        Err(StorageError::Precondition { .. }) => {
            debug!(%email, "signup for taken email");
            Ok(Outcome::keep(Response::Signup(SignupResponse {
                success: false,
                email_taken: true,
            })))
        }
        Err(e) => Err(e.into()),
    }
}

async fn login(gateway: &Gateway, req: LoginRequest) -> ProtocolResult<Outcome> {
    let LoginRequest { email, auth_key } = req;
    let email = parse_email(&email)?;

    if let Err(e) = gateway.rate_limits().check_login(&email) {
        gateway
            .metrics()
            .rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
        return Err(e.into());
    }

    let rejected = || {
        Outcome::keep(Response::Login(LoginResponse {
            success: false,
            password_correct: false,
        }))
    };

    let user = match gateway.storage().get_user(&email).await {
        Ok(user) => user,
        Err(StorageError::NotFound { .. }) => {
            // Same answer and same argon2 cost as a wrong key, so neither reveals
            // whether the account exists
            gateway.verify_key(auth_key, KeyHash::PLACEHOLDER).await?;
            debug!(%email, "login for unknown email");
            return Ok(rejected());
        }
        Err(e) => return Err(e.into()),
    };

    if !gateway.verify_key(auth_key, user.auth_key_hash).await? {
        debug!(%email, "login with wrong key");
        return Ok(rejected());
    }

    info!(%email, "user logged in");
    Ok(Outcome {
        response: Response::Login(LoginResponse {
            success: true,
            password_correct: true,
        }),
        binding: Binding::Bind(email),
    })
}

async fn fetch(gateway: &Gateway, email: Email) -> ProtocolResult<Response> {
    let user = gateway.storage().get_user(&email).await?;
    let directory = gateway.storage().user_directory().await?;

    let mut response = FetchResponse {
        success: true,
        private_info: ByteBuf::from(user.private_info),
        messages: user.messages.into_iter().map(ByteBuf::from).collect(),
        ..Default::default()
    };
    for entry in directory {
        response.all_user_emails.push(entry.email.to_string());
        response.all_user_descriptions.push(entry.description);
        response.all_user_public_keys.push(entry.public_key);
    }

    debug!(
        %email,
        messages = response.messages.len(),
        users = response.all_user_emails.len(),
        "fetched account"
    );
    Ok(Response::Fetch(response))
}

async fn push(gateway: &Gateway, email: Email, req: PushRequest) -> ProtocolResult<Response> {
    let messages: Vec<Vec<u8>> = req.messages.into_iter().map(ByteBuf::into_vec).collect();
    gateway
        .storage()
        .update_user_private(&email, &req.private_info, &messages)
        .await?;

    debug!(%email, messages = messages.len(), "pushed account state");
    Ok(Response::Push(PushResponse { success: true }))
}

async fn send(gateway: &Gateway, sender: Email, req: SendRequest) -> ProtocolResult<Response> {
    let limit = gateway.config().storage.max_send_content;
    if req.content.len() > limit {
        return Err(ProtocolError::ContentTooLarge {
            size: req.content.len(),
            limit,
        });
    }

    let target = parse_email(&req.target_email)?;
    gateway.storage().append_message(&target, &req.content).await?;

    debug!(%sender, %target, bytes = req.content.len(), "message delivered");
    Ok(Response::Send(SendResponse { success: true }))
}

/// Load an item's metadata and check `auth_key` against it.
///
/// `Ok(None)` means the key was wrong.
async fn authorize_item(
    gateway: &Gateway,
    item_id: &ItemId,
    auth_key: Key,
) -> ProtocolResult<Option<Item>> {
    let item = gateway.storage().get_item_metadata(item_id).await?;
    if gateway.verify_key(auth_key, item.auth_key_hash).await? {
        Ok(Some(item))
    } else {
        debug!(%item_id, "wrong item key");
        Ok(None)
    }
}

async fn item_fetch(gateway: &Gateway, req: ItemFetchRequest) -> ProtocolResult<Response> {
    let ItemFetchRequest { item_id, auth_key } = req;
    if authorize_item(gateway, &item_id, auth_key).await?.is_none() {
        return Ok(Response::ItemFetch(ItemFetchResponse {
            wrong_key: true,
            ..Default::default()
        }));
    }

    let item = gateway.storage().get_item(&item_id).await?;
    Ok(Response::ItemFetch(ItemFetchResponse {
        success: true,
        wrong_key: false,
        contents: ByteBuf::from(item.contents),
        release_key_infos: item
            .release_keys
            .into_iter()
            .map(|k| ByteBuf::from(k.info))
            .collect(),
    }))
}

async fn create_item(gateway: &Gateway, req: CreateItemRequest) -> ProtocolResult<Response> {
    let CreateItemRequest { contents, auth_key } = req;
    let limit = gateway.config().storage.max_item_contents();
    if contents.len() > limit {
        debug!(bytes = contents.len(), limit, "item too large to create");
        return Ok(Response::CreateItem(CreateItemResponse {
            success: false,
            item_id: None,
        }));
    }

    let item = Item {
        id: ItemId::new(),
        auth_key_hash: gateway.hash_key(auth_key).await?,
        contents: contents.into_vec(),
        release_keys: Vec::new(),
    };
    gateway.storage().insert_item(&item, false).await?;

    debug!(item_id = %item.id, bytes = item.contents.len(), "item created");
    Ok(Response::CreateItem(CreateItemResponse {
        success: true,
        item_id: Some(item.id),
    }))
}

async fn encrypt_item(gateway: &Gateway, req: EncryptItemRequest) -> ProtocolResult<Response> {
    let EncryptItemRequest {
        item_id,
        auth_key,
        public_key,
        prefix,
    } = req;
    if authorize_item(gateway, &item_id, auth_key).await?.is_none() {
        return Ok(Response::EncryptItem(EncryptItemResponse {
            success: false,
            wrong_key: true,
        }));
    }

    // Contents stay opaque; the key is only recorded
    debug!(%item_id, ?public_key, prefix = prefix.len(), "prefixing item contents");
    let limit = gateway.config().storage.max_item_contents();
    let success = match gateway
        .storage()
        .prefix_item_contents(&item_id, &prefix, limit)
        .await
    {
        Ok(()) => true,
        Err(StorageError::ContentsTooLarge { size, limit, .. }) => {
            debug!(%item_id, size, limit, "prefix would outgrow item limit");
            false
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Response::EncryptItem(EncryptItemResponse {
        success,
        wrong_key: false,
    }))
}

async fn release_item(gateway: &Gateway, req: ReleaseItemRequest) -> ProtocolResult<Response> {
    let ReleaseItemRequest {
        item_id,
        auth_key,
        info,
        expires,
    } = req;
    if authorize_item(gateway, &item_id, auth_key).await?.is_none() {
        return Ok(Response::ReleaseItem(ReleaseItemResponse {
            success: false,
            wrong_key: true,
        }));
    }

    if expires <= current_timestamp() {
        debug!(%item_id, expires, "release key already expired");
    }
    gateway
        .storage()
        .insert_release_key(
            &item_id,
            &ReleaseKey {
                info: info.into_vec(),
                expires,
            },
        )
        .await?;

    Ok(Response::ReleaseItem(ReleaseItemResponse {
        success: true,
        wrong_key: false,
    }))
}

async fn set_profile(
    gateway: &Gateway,
    email: Email,
    req: SetProfileRequest,
) -> ProtocolResult<Response> {
    gateway
        .storage()
        .update_user_profile(&email, &req.public_key, &req.description)
        .await?;

    debug!(%email, "profile updated");
    Ok(Response::SetProfile(SetProfileResponse { success: true }))
}

async fn delete_user(
    gateway: &Gateway,
    email: Email,
    req: DeleteUserRequest,
) -> ProtocolResult<Outcome> {
    let user = gateway.storage().get_user(&email).await?;
    if !gateway.verify_key(req.auth_key, user.auth_key_hash).await? {
        return Ok(Outcome::keep(Response::DeleteUser(DeleteUserResponse {
            success: false,
            password_correct: false,
        })));
    }

    gateway.storage().remove_user(&email).await?;
    info!(%email, "user deleted");
    Ok(Outcome {
        response: Response::DeleteUser(DeleteUserResponse {
            success: true,
            password_correct: true,
        }),
        binding: Binding::Unbind,
    })
}

async fn delete_item(gateway: &Gateway, req: DeleteItemRequest) -> ProtocolResult<Response> {
    let DeleteItemRequest { item_id, auth_key } = req;
    if authorize_item(gateway, &item_id, auth_key).await?.is_none() {
        return Ok(Response::DeleteItem(DeleteItemResponse {
            success: false,
            wrong_key: true,
        }));
    }

    gateway.storage().remove_item(&item_id).await?;
    debug!(%item_id, "item deleted");
    Ok(Response::DeleteItem(DeleteItemResponse {
        success: true,
        wrong_key: false,
    }))
}
