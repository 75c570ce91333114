use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::storage::memory::MemoryBlobStore;
use common::storage::{BlobStore, BoxReader, StorageError, StorageKey};
use common::{StorageBackendConfig, StorageConfig};
use reqwest::Client;
use reqwest::header::HeaderMap;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde_json::{Value, json};

use docvault_server::config::{
    AppConfig, Argon2Config, AuthConfig, BootstrapAdminConfig, CorsConfig, DatabaseConfig,
    ServerConfig,
};
use docvault_server::entity::document;
use docvault_server::state::AppState;
use docvault_server::utils::oauth::{ExternalIdentity, IdentityProvider, OAuthError};

pub const ADMIN_EMAIL: &str = "admin@docvault.test";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const JWT_SECRET: &str = "test-secret-for-integration-tests";

pub mod routes {
    pub const REGISTER: &str = "/api/v1/auth/register";
    pub const LOGIN: &str = "/api/v1/auth/login";
    pub const LOGOUT: &str = "/api/v1/auth/logout";
    pub const ME: &str = "/api/v1/auth/me";
    pub const ME_PASSWORD: &str = "/api/v1/auth/me/password";
    pub const OAUTH_LOGIN: &str = "/api/v1/auth/oauth/login";
    pub const OAUTH_CALLBACK: &str = "/api/v1/auth/oauth/callback";
    pub const DOCUMENTS: &str = "/api/v1/documents";
    pub const ADMIN_USERS: &str = "/api/v1/admin/users";
    pub const ADMIN_DOCUMENTS: &str = "/api/v1/admin/documents";

    pub fn document(id: i32) -> String {
        format!("/api/v1/documents/{id}")
    }

    pub fn document_content(id: i32) -> String {
        format!("/api/v1/documents/{id}/content")
    }

    pub fn admin_user(id: i32) -> String {
        format!("/api/v1/admin/users/{id}")
    }

    pub fn admin_user_active(id: i32) -> String {
        format!("/api/v1/admin/users/{id}/active")
    }

    pub fn admin_user_admin(id: i32) -> String {
        format!("/api/v1/admin/users/{id}/admin")
    }

    pub fn admin_document(id: i32) -> String {
        format!("/api/v1/admin/documents/{id}")
    }
}

/// Configuration for a throwaway server: in-memory SQLite and blobs, cheap hashing.
pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors: CorsConfig {
                allow_origins: vec![],
                max_age: 3600,
            },
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
        },
        auth: AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
            token_ttl_minutes: 30,
            cookie_name: "access_token".to_string(),
            cookie_secure: false,
            argon2: Argon2Config {
                memory_kib: 256,
                iterations: 1,
                parallelism: 1,
            },
            bootstrap_admin: Some(BootstrapAdminConfig {
                email: ADMIN_EMAIL.to_string(),
                password: ADMIN_PASSWORD.to_string(),
                display_name: "Administrator".to_string(),
            }),
        },
        storage: StorageConfig {
            backend: StorageBackendConfig::Memory,
            max_upload_size: 64 * 1024,
            allowed_extensions: vec![],
            signed_url_ttl_secs: 300,
        },
        oauth: None,
    }
}

type StoreWrapper = Box<dyn FnOnce(Arc<MemoryBlobStore>) -> Arc<dyn BlobStore>>;

pub struct TestAppBuilder {
    config: AppConfig,
    wrap_store: Option<StoreWrapper>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
}

impl TestAppBuilder {
    pub fn max_upload_size(mut self, bytes: u64) -> Self {
        self.config.storage.max_upload_size = bytes;
        self
    }

    pub fn allowed_extensions(mut self, extensions: &[&str]) -> Self {
        self.config.storage.allowed_extensions =
            extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Put a wrapper (a fault injector, a signing backend) in front of the memory store.
    pub fn blob_store(
        mut self,
        wrap: impl FnOnce(Arc<MemoryBlobStore>) -> Arc<dyn BlobStore> + 'static,
    ) -> Self {
        self.wrap_store = Some(Box::new(wrap));
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    pub async fn spawn(self) -> TestApp {
        let db = docvault_server::database::init_db(&self.config.database.url)
            .await
            .expect("Failed to initialize in-memory database");

        let memory = Arc::new(MemoryBlobStore::new(self.config.storage.max_upload_size));
        let store: Arc<dyn BlobStore> = match self.wrap_store {
            Some(wrap) => wrap(memory.clone()),
            None => memory.clone(),
        };

        let mut state = AppState::new(self.config, db.clone(), store)
            .expect("Failed to build application state");
        if let Some(provider) = self.identity_provider {
            state = state.with_identity_provider(provider);
        }

        docvault_server::seed::bootstrap_admin(&state)
            .await
            .expect("Failed to bootstrap admin");

        let app = docvault_server::build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        TestApp {
            addr,
            client,
            db,
            state,
            memory,
        }
    }
}

/// A running test server.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub state: AppState,
    /// Backing store for every blob the server writes.
    pub memory: Arc<MemoryBlobStore>,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            config: test_config(),
            wrap_store: None,
            identity_provider: None,
        }
    }

    pub async fn spawn() -> Self {
        Self::builder().spawn().await
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn post_with_token(&self, path: &str, body: &Value, token: &str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_without_token(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn get_with_token(&self, path: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_with_cookie(&self, path: &str, cookie: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("Cookie", cookie)
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_without_token(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn patch_with_token(&self, path: &str, body: &Value, token: &str) -> TestResponse {
        let res = self
            .client
            .patch(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .expect("Failed to send PATCH request");

        TestResponse::from_response(res).await
    }

    pub async fn put_with_token(&self, path: &str, body: &Value, token: &str) -> TestResponse {
        let res = self
            .client
            .put(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .expect("Failed to send PUT request");

        TestResponse::from_response(res).await
    }

    pub async fn delete_with_token(&self, path: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    pub async fn upload_with_token(
        &self,
        file_name: &str,
        mime: &str,
        file_bytes: Vec<u8>,
        token: &str,
    ) -> TestResponse {
        let part = reqwest::multipart::Part::bytes(file_bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .expect("Failed to set MIME type");
        let form = reqwest::multipart::Form::new().part("file", part);

        self.send_multipart(reqwest::Method::POST, routes::DOCUMENTS, form, token)
            .await
    }

    pub async fn send_multipart(
        &self,
        method: reqwest::Method,
        path: &str,
        form: reqwest::multipart::Form,
        token: &str,
    ) -> TestResponse {
        let res = self
            .client
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart request");

        TestResponse::from_response(res).await
    }

    /// Register a user and log in, returning the auth token.
    pub async fn create_authenticated_user(&self, email: &str, password: &str) -> String {
        let display_name = email.split('@').next().unwrap_or("user");
        let reg = self
            .post_without_token(
                routes::REGISTER,
                &json!({
                    "email": email,
                    "display_name": display_name,
                    "password": password,
                }),
            )
            .await;
        assert_eq!(reg.status, 201, "Registration failed: {}", reg.text);

        self.login(email, password).await
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let res = self
            .post_without_token(
                routes::LOGIN,
                &json!({"email": email, "password": password}),
            )
            .await;
        assert_eq!(res.status, 200, "Login failed: {}", res.text);

        res.body["token"]
            .as_str()
            .expect("Login response should contain a token")
            .to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    /// Id of the account behind `token`.
    pub async fn user_id(&self, token: &str) -> i32 {
        let res = self.get_with_token(routes::ME, token).await;
        assert_eq!(res.status, 200, "GET /me failed: {}", res.text);
        res.id()
    }

    /// Upload a small text document and return its `id`.
    pub async fn create_document(&self, token: &str, file_name: &str, content: &str) -> i32 {
        let res = self
            .upload_with_token(file_name, "text/plain", content.as_bytes().to_vec(), token)
            .await;
        assert_eq!(res.status, 201, "create_document failed: {}", res.text);
        res.id()
    }

    /// Storage key recorded for a document, read straight from the database.
    pub async fn storage_key(&self, document_id: i32) -> StorageKey {
        let doc = document::Entity::find_by_id(document_id)
            .one(&self.db)
            .await
            .expect("DB query failed")
            .expect("Document row not found");
        StorageKey::parse(&doc.storage_key).expect("Stored key should be valid")
    }

    pub async fn blob_count(&self) -> usize {
        self.memory.len().await
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let bytes = res.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            bytes,
            text,
            body,
        }
    }

    pub fn id(&self) -> i32 {
        self.body["id"]
            .as_i64()
            .expect("response body should contain 'id'") as i32
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `name=value` pair of the first `Set-Cookie` header for `name`.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .find(|pair| pair.starts_with(&format!("{name}=")))
            .map(str::to_string)
    }
}

/// Blob store whose deletes can be switched to fail.
pub struct FlakyBlobStore {
    pub inner: Arc<MemoryBlobStore>,
    pub fail_deletes: Arc<AtomicBool>,
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn put_stream(&self, key: &StorageKey, reader: BoxReader) -> Result<u64, StorageError> {
        self.inner.put_stream(key, reader).await
    }

    async fn get_stream(&self, key: &StorageKey) -> Result<BoxReader, StorageError> {
        self.inner.get_stream(key).await
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool, StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected delete failure".into()));
        }
        self.inner.delete(key).await
    }
}

/// Blob store that hands out pre-signed URLs, like an object store would.
pub struct SigningBlobStore {
    pub inner: Arc<MemoryBlobStore>,
}

#[async_trait]
impl BlobStore for SigningBlobStore {
    fn backend_name(&self) -> &'static str {
        "signing"
    }

    async fn put_stream(&self, key: &StorageKey, reader: BoxReader) -> Result<u64, StorageError> {
        self.inner.put_stream(key, reader).await
    }

    async fn get_stream(&self, key: &StorageKey) -> Result<BoxReader, StorageError> {
        self.inner.get_stream(key).await
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }

    async fn signed_url(
        &self,
        key: &StorageKey,
        ttl: Duration,
    ) -> Result<Option<String>, StorageError> {
        Ok(Some(format!(
            "https://blobs.example/{key}?expires={}",
            ttl.as_secs()
        )))
    }
}

/// Identity provider that accepts one fixed code.
pub struct StubIdentityProvider {
    pub code: String,
    pub identity: ExternalIdentity,
}

impl StubIdentityProvider {
    pub fn new(code: &str, sub: &str, email: &str) -> Self {
        Self {
            code: code.to_string(),
            identity: ExternalIdentity {
                sub: sub.to_string(),
                email: email.to_string(),
                name: Some("External User".to_string()),
            },
        }
    }
}

#[async_trait]
impl IdentityProvider for StubIdentityProvider {
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        Ok(format!("https://idp.example/authorize?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<ExternalIdentity, OAuthError> {
        if code == self.code {
            Ok(self.identity.clone())
        } else {
            Err(OAuthError::Status(400))
        }
    }
}
