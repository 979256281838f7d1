use axum::http::{HeaderValue, header};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use sha2::Sha256;
use uuid::Uuid;

use super::{SessionError, SessionManager, SessionStore};
use crate::config::Config;
use crate::context::Request;
use crate::writer::ResponseWriter;

#[derive(Debug)]
struct Entry {
    data: Map<String, Value>,
    touched: Instant,
}

type HmacSha256 = Hmac<Sha256>;

struct Shared {
    sessions: Mutex<HashMap<String, Entry>>,
    cookie_name: String,
    lifetime: Duration,
    secret: Vec<u8>,
}

impl Shared {
    fn is_live(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.touched) <= self.lifetime
    }

    fn mac(&self, id: &str) -> Result<HmacSha256, SessionError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)?;
        mac.update(id.as_bytes());
        Ok(mac)
    }

    /// Cookie value for `id`: `<id>.<base64url HMAC-SHA256 of id>`
    fn sign(&self, id: &str) -> Result<String, SessionError> {
        let signature = self.mac(id)?.finalize().into_bytes();
        Ok(format!("{id}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// The session id carried by a cookie value, if its signature holds.
    fn verify<'v>(&self, value: &'v str) -> Option<&'v str> {
        let (id, signature) = value.rsplit_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        self.mac(id).ok()?.verify_slice(&signature).ok()?;
        Some(id)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("sessions", &self.sessions.lock().len())
            .field("cookie_name", &self.cookie_name)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// Cookie-identified sessions kept in process memory.
///
/// The cookie carries the session id signed with the application secret;
/// a cookie whose signature does not verify starts a fresh session.
#[derive(Debug, Clone)]
pub struct MemorySessionManager {
    shared: Arc<Shared>,
}

impl MemorySessionManager {
    pub fn new(
        cookie_name: impl Into<String>,
        lifetime: Duration,
        secret: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sessions: Mutex::new(HashMap::new()),
                cookie_name: cookie_name.into(),
                lifetime,
                secret: secret.as_ref().to_vec(),
            }),
        }
    }

    /// Cookie settings from `[session]`, signing key from `[secret]`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.session.cookie_name.clone(),
            Duration::from_secs(config.session.lifetime_secs),
            &config.secret.key,
        )
    }

    pub fn cookie_name(&self) -> &str {
        &self.shared.cookie_name
    }

    /// Sessions currently stored, expired ones included until collected.
    pub fn len(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cookie_value<'r>(&self, request: &'r Request) -> Option<&'r str> {
        request
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.shared.cookie_name)
            .map(|(_, value)| value.trim_matches('"'))
    }

    fn session_id<'r>(&self, request: &'r Request) -> Option<&'r str> {
        let value = self.cookie_value(request)?;
        let id = self.shared.verify(value);
        if id.is_none() {
            debug!(cookie = %self.shared.cookie_name, "Session cookie signature rejected");
        }
        id
    }
}

impl SessionManager for MemorySessionManager {
    fn start(
        &self,
        request: &Request,
        _writer: &mut ResponseWriter,
    ) -> Result<Box<dyn SessionStore>, SessionError> {
        let now = Instant::now();
        let existing = self.session_id(request).and_then(|id| {
            let sessions = self.shared.sessions.lock();
            sessions
                .get(id)
                .filter(|entry| self.shared.is_live(entry, now))
                .map(|entry| (id.to_string(), entry.data.clone()))
        });

        let (id, data) = match existing {
            Some(found) => found,
            None => {
                let id = Uuid::new_v4().to_string();
                debug!(session = %id, "Starting new session");
                (id, Map::new())
            }
        };

        Ok(Box::new(MemorySession {
            id,
            data,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn gc(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.shared.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| self.shared.is_live(entry, now));
        before - sessions.len()
    }
}

struct MemorySession {
    id: String,
    data: Map<String, Value>,
    shared: Arc<Shared>,
}

impl SessionStore for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.data.remove(key);
    }

    fn snapshot(&self) -> Map<String, Value> {
        self.data.clone()
    }

    fn release(&mut self, writer: &mut ResponseWriter) -> Result<(), SessionError> {
        self.shared.sessions.lock().insert(
            self.id.clone(),
            Entry {
                data: self.data.clone(),
                touched: Instant::now(),
            },
        );

        if writer.written() {
            warn!(session = %self.id, "Headers already written, session cookie not sent");
            return Ok(());
        }

        let cookie = format!(
            "{}={}; Path=/; HttpOnly; Max-Age={}",
            self.shared.cookie_name,
            self.shared.sign(&self.id)?,
            self.shared.lifetime.as_secs()
        );
        let cookie =
            HeaderValue::from_str(&cookie).map_err(|_| SessionError::InvalidCookie(cookie))?;
        writer.headers_mut().append(header::SET_COOKIE, cookie);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::MemoryStream;
    use axum::http::Method;

    fn request(cookie: Option<&str>) -> Request {
        let request = Request::new(Method::GET, "/".parse().unwrap());
        match cookie {
            Some(cookie) => request.with_header(header::COOKIE, cookie),
            None => request,
        }
    }

    #[test]
    fn test_release_sets_cookie_and_persists() {
        let manager = MemorySessionManager::new("session", Duration::from_secs(60), "test-secret");
        let stream = MemoryStream::new();
        let mut writer = ResponseWriter::new(stream.clone());

        let mut session = manager.start(&request(None), &mut writer).unwrap();
        session.set("user", Value::from("ada"));
        session.release(&mut writer).unwrap();
        writer.write_header_now().unwrap();

        let cookie = stream.recording().headers[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with(&format!("session={}", session.id())));
        assert_eq!(manager.len(), 1);

        let pair = cookie.split(';').next().unwrap();
        let mut writer = ResponseWriter::detached();
        let restored = manager
            .start(&request(Some(&format!("theme=dark; {pair}"))), &mut writer)
            .unwrap();
        assert_eq!(restored.id(), session.id());
        assert_eq!(restored.get("user"), Some(Value::from("ada")));
    }

    #[test]
    fn test_unknown_cookie_starts_fresh_session() {
        let manager = MemorySessionManager::new("session", Duration::from_secs(60), "test-secret");
        let mut writer = ResponseWriter::detached();

        let session = manager
            .start(&request(Some("session=not-a-known-id")), &mut writer)
            .unwrap();
        assert_ne!(session.id(), "not-a-known-id");
        assert!(session.snapshot().is_empty());
    }

    fn signed_for_other_id(manager: &MemorySessionManager, id: &str) -> String {
        let other = manager.shared.sign("some-other-id").unwrap();
        let (_, signature) = other.split_once('.').unwrap();
        format!("session={id}.{signature}")
    }

    #[test]
    fn test_tampered_cookie_starts_fresh_session() {
        let manager = MemorySessionManager::new("session", Duration::from_secs(60), "test-secret");
        let mut writer = ResponseWriter::new(MemoryStream::new());

        let mut session = manager.start(&request(None), &mut writer).unwrap();
        session.set("user", Value::from("ada"));
        session.release(&mut writer).unwrap();
        let id = session.id().to_string();

        for cookie in [
            format!("session={id}"),
            format!("session={id}.AAAA"),
            signed_for_other_id(&manager, &id),
        ] {
            let mut writer = ResponseWriter::detached();
            let restored = manager.start(&request(Some(&cookie)), &mut writer).unwrap();
            assert_ne!(restored.id(), id, "{cookie}");
            assert!(restored.get("user").is_none());
        }
    }

    #[test]
    fn test_cookie_signed_with_other_secret_rejected() {
        let manager = MemorySessionManager::new("session", Duration::from_secs(60), "test-secret");
        let mut writer = ResponseWriter::detached();
        let mut session = manager.start(&request(None), &mut writer).unwrap();
        session.release(&mut writer).unwrap();

        let forged = MemorySessionManager::new("session", Duration::from_secs(60), "guessed")
            .shared
            .sign(session.id())
            .unwrap();
        let restored = manager
            .start(&request(Some(&format!("session={forged}"))), &mut writer)
            .unwrap();
        assert_ne!(restored.id(), session.id());
    }

    #[test]
    fn test_gc_drops_expired_sessions() {
        let manager = MemorySessionManager::new("session", Duration::from_millis(1), "test-secret");
        let mut writer = ResponseWriter::detached();

        let mut session = manager.start(&request(None), &mut writer).unwrap();
        session.release(&mut writer).unwrap();
        assert_eq!(manager.len(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(manager.gc(), 1);
        assert!(manager.is_empty());
    }
}
