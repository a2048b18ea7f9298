//! Client - typed access to a Lockbox server.
//!
//! Every method sends one request and waits for its response while holding
//! the connection, so calls on one [`Client`] are answered in the order they
//! were made, which is what the server's one-request-in-flight rule expects.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::connect("127.0.0.1:2048").await?;
//! let created = client.create_item(b"ciphertext".to_vec(), Key::from(7u64)).await?;
//! let item = client.item_fetch(created.item_id.unwrap(), Key::from(7u64)).await?;
//! ```

use lockbox_core::{FramedTransport, TransportError};
use lockbox_types::{
    ByteBuf, CreateItemRequest, CreateItemResponse, DeleteItemRequest, DeleteItemResponse,
    DeleteUserRequest, DeleteUserResponse, EncryptItemRequest, EncryptItemResponse,
    FetchResponse, ItemFetchRequest, ItemFetchResponse, ItemId, Key, LockboxError,
    LoginRequest, LoginResponse, PushRequest, PushResponse, ReleaseItemRequest,
    ReleaseItemResponse, Request, RequestKind, Response, SendRequest, SendResponse,
    SetProfileRequest, SetProfileResponse, SignupRequest, SignupResponse,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

/// Client errors.
///
/// A rejected key or a generic server failure is not an error: those come
/// back as response flags.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the server.
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// Framing or socket failure, including the server hanging up.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] LockboxError),

    /// The server answered with a response for a different request kind.
    #[error("unexpected response: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        /// Kind of the request sent.
        expected: RequestKind,
        /// Kind of the response received.
        actual: RequestKind,
    },
}

/// A connection to a Lockbox server.
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    transport: Mutex<FramedTransport<S>>,
}

impl Client<TcpStream> {
    /// Open a TCP connection to `addr`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {}", e);
        }
        Ok(Self::new(stream))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            transport: Mutex::new(FramedTransport::new(stream)),
        }
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, request: Request) -> Result<Response, ClientError> {
        let kind = request.kind();
        let bytes = lockbox_types::encode(&request)?;

        let mut transport = self.transport.lock().await;
        transport.send(&bytes).await?;
        let reply = transport.recv().await?;
        drop(transport);

        let response: Response = lockbox_types::decode(&reply)?;
        if response.kind() != kind {
            return Err(ClientError::UnexpectedResponse {
                expected: kind,
                actual: response.kind(),
            });
        }
        tracing::trace!(kind = kind.as_str(), success = response.is_success(), "call");
        Ok(response)
    }

    /// Close the connection. Later calls fail with a transport error.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.transport.lock().await.close().await?;
        Ok(())
    }

    /// Create an account. A successful signup also logs this connection in.
    pub async fn signup(&self, email: &str, auth_key: Key) -> Result<SignupResponse, ClientError> {
        let request = Request::Signup(SignupRequest {
            email: email.to_string(),
            auth_key,
        });
        match self.call(request).await? {
            Response::Signup(r) => Ok(r),
            other => Err(mismatch(RequestKind::Signup, &other)),
        }
    }

    /// Log this connection in.
    pub async fn login(&self, email: &str, auth_key: Key) -> Result<LoginResponse, ClientError> {
        let request = Request::Login(LoginRequest {
            email: email.to_string(),
            auth_key,
        });
        match self.call(request).await? {
            Response::Login(r) => Ok(r),
            other => Err(mismatch(RequestKind::Login, &other)),
        }
    }

    /// Read own private info and messages plus the user directory.
    pub async fn fetch(&self) -> Result<FetchResponse, ClientError> {
        match self.call(Request::Fetch).await? {
            Response::Fetch(r) => Ok(r),
            other => Err(mismatch(RequestKind::Fetch, &other)),
        }
    }

    /// Replace own private info and message queue.
    pub async fn push(
        &self,
        private_info: Vec<u8>,
        messages: Vec<Vec<u8>>,
    ) -> Result<PushResponse, ClientError> {
        let request = Request::Push(PushRequest {
            private_info: ByteBuf::from(private_info),
            messages: messages.into_iter().map(ByteBuf::from).collect(),
        });
        match self.call(request).await? {
            Response::Push(r) => Ok(r),
            other => Err(mismatch(RequestKind::Push, &other)),
        }
    }

    /// Append a message to another user's queue.
    pub async fn send(
        &self,
        target_email: &str,
        content: Vec<u8>,
    ) -> Result<SendResponse, ClientError> {
        let request = Request::Send(SendRequest {
            target_email: target_email.to_string(),
            content: ByteBuf::from(content),
        });
        match self.call(request).await? {
            Response::Send(r) => Ok(r),
            other => Err(mismatch(RequestKind::Send, &other)),
        }
    }

    /// Read an item's contents and live release keys.
    pub async fn item_fetch(
        &self,
        item_id: ItemId,
        auth_key: Key,
    ) -> Result<ItemFetchResponse, ClientError> {
        let request = Request::ItemFetch(ItemFetchRequest { item_id, auth_key });
        match self.call(request).await? {
            Response::ItemFetch(r) => Ok(r),
            other => Err(mismatch(RequestKind::ItemFetch, &other)),
        }
    }

    /// Store a new item. The server allocates its id.
    pub async fn create_item(
        &self,
        contents: Vec<u8>,
        auth_key: Key,
    ) -> Result<CreateItemResponse, ClientError> {
        let request = Request::CreateItem(CreateItemRequest {
            contents: ByteBuf::from(contents),
            auth_key,
        });
        match self.call(request).await? {
            Response::CreateItem(r) => Ok(r),
            other => Err(mismatch(RequestKind::CreateItem, &other)),
        }
    }

    /// Prepend `prefix` to an item's contents.
    pub async fn encrypt_item(
        &self,
        item_id: ItemId,
        auth_key: Key,
        public_key: Key,
        prefix: Vec<u8>,
    ) -> Result<EncryptItemResponse, ClientError> {
        let request = Request::EncryptItem(EncryptItemRequest {
            item_id,
            auth_key,
            public_key,
            prefix: ByteBuf::from(prefix),
        });
        match self.call(request).await? {
            Response::EncryptItem(r) => Ok(r),
            other => Err(mismatch(RequestKind::EncryptItem, &other)),
        }
    }

    /// Attach a release key that stops being returned after `expires`
    /// (Unix seconds).
    pub async fn release_item(
        &self,
        item_id: ItemId,
        auth_key: Key,
        info: Vec<u8>,
        expires: i64,
    ) -> Result<ReleaseItemResponse, ClientError> {
        let request = Request::ReleaseItem(ReleaseItemRequest {
            item_id,
            auth_key,
            info: ByteBuf::from(info),
            expires,
        });
        match self.call(request).await? {
            Response::ReleaseItem(r) => Ok(r),
            other => Err(mismatch(RequestKind::ReleaseItem, &other)),
        }
    }

    /// Publish own public key and description.
    pub async fn set_profile(
        &self,
        public_key: Key,
        description: &str,
    ) -> Result<SetProfileResponse, ClientError> {
        let request = Request::SetProfile(SetProfileRequest {
            public_key,
            description: description.to_string(),
        });
        match self.call(request).await? {
            Response::SetProfile(r) => Ok(r),
            other => Err(mismatch(RequestKind::SetProfile, &other)),
        }
    }

    /// Delete the logged-in account.
    pub async fn delete_user(&self, auth_key: Key) -> Result<DeleteUserResponse, ClientError> {
        let request = Request::DeleteUser(DeleteUserRequest { auth_key });
        match self.call(request).await? {
            Response::DeleteUser(r) => Ok(r),
            other => Err(mismatch(RequestKind::DeleteUser, &other)),
        }
    }

    /// Delete an item and its release keys.
    pub async fn delete_item(
        &self,
        item_id: ItemId,
        auth_key: Key,
    ) -> Result<DeleteItemResponse, ClientError> {
        let request = Request::DeleteItem(DeleteItemRequest { item_id, auth_key });
        match self.call(request).await? {
            Response::DeleteItem(r) => Ok(r),
            other => Err(mismatch(RequestKind::DeleteItem, &other)),
        }
    }
}

// call() already checked the kind; this only guards the typed unpacking
fn mismatch(expected: RequestKind, actual: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        actual: actual.kind(),
    }
}
