use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use super::request::{Request, Response};
use super::Registration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Entries are keyed by method and URL, fragment removed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn for_request(request: &Request) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method.as_str().to_string(),
            url: url.to_string(),
        }
    }
}

/// Listing row for one stored entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub status: u16,
    pub bytes: usize,
    pub stored_at: DateTime<Utc>,
}

/// Named caches of responses plus the persisted registration. Writing to a
/// cache that does not exist yet creates it.
pub trait CacheStorage: Send + 'static {
    fn open(&mut self, cache: &str) -> Result<(), StorageError>;

    /// Cache names in creation order
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn delete(&mut self, cache: &str) -> Result<bool, StorageError>;

    fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<Response>, StorageError>;

    fn put(&mut self, cache: &str, key: &CacheKey, response: &Response) -> Result<(), StorageError>;

    /// All or nothing
    fn put_all(&mut self, cache: &str, entries: &[(CacheKey, Response)]) -> Result<(), StorageError>;

    fn entries(&self, cache: &str) -> Result<Vec<EntryInfo>, StorageError>;

    fn load_registration(&self) -> Result<Registration, StorageError>;

    fn save_registration(&mut self, registration: &Registration) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: Vec<(String, HashMap<CacheKey, (Response, DateTime<Utc>)>)>,
    registration: Registration,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_mut(&mut self, cache: &str) -> &mut HashMap<CacheKey, (Response, DateTime<Utc>)> {
        let idx = match self.caches.iter().position(|(name, _)| name == cache) {
            Some(idx) => idx,
            None => {
                self.caches.push((cache.to_string(), HashMap::new()));
                self.caches.len() - 1
            }
        };
        &mut self.caches[idx].1
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open(&mut self, cache: &str) -> Result<(), StorageError> {
        self.cache_mut(cache);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.caches.iter().map(|(name, _)| name.clone()).collect())
    }

    fn delete(&mut self, cache: &str) -> Result<bool, StorageError> {
        let before = self.caches.len();
        self.caches.retain(|(name, _)| name != cache);
        Ok(self.caches.len() != before)
    }

    fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<Response>, StorageError> {
        Ok(self
            .caches
            .iter()
            .find(|(name, _)| name == cache)
            .and_then(|(_, entries)| entries.get(key))
            .map(|(resp, _)| resp.clone()))
    }

    fn put(&mut self, cache: &str, key: &CacheKey, response: &Response) -> Result<(), StorageError> {
        self.cache_mut(cache)
            .insert(key.clone(), (response.clone(), Utc::now()));
        Ok(())
    }

    fn put_all(&mut self, cache: &str, entries: &[(CacheKey, Response)]) -> Result<(), StorageError> {
        for (key, response) in entries {
            self.put(cache, key, response)?;
        }
        Ok(())
    }

    fn entries(&self, cache: &str) -> Result<Vec<EntryInfo>, StorageError> {
        let mut infos: Vec<EntryInfo> = self
            .caches
            .iter()
            .find(|(name, _)| name == cache)
            .map(|(_, entries)| {
                entries
                    .iter()
                    .map(|(key, (resp, stored_at))| EntryInfo {
                        key: key.clone(),
                        status: resp.status.as_u16(),
                        bytes: resp.body.len(),
                        stored_at: *stored_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        infos.sort_by(|a, b| a.key.url.cmp(&b.key.url));
        Ok(infos)
    }

    fn load_registration(&self) -> Result<Registration, StorageError> {
        Ok(self.registration.clone())
    }

    fn save_registration(&mut self, registration: &Registration) -> Result<(), StorageError> {
        self.registration = registration.clone();
        Ok(())
    }
}

/// SQLite backed caches that survive restarts
#[derive(Debug)]
pub struct SqliteCacheStorage {
    conn: Connection,
}

impl SqliteCacheStorage {
    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS caches (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_name TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                final_url TEXT NOT NULL,
                redirected BOOLEAN NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (cache_name, method, url)
            );

            CREATE TABLE IF NOT EXISTS registration (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self { conn })
    }

    fn insert_entry(
        conn: &Connection,
        cache: &str,
        key: &CacheKey,
        response: &Response,
    ) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
            params![cache, now],
        )?;

        let headers: Vec<StoredHeader> = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let headers = serde_json::to_string(&headers)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
            (cache_name, method, url, status, headers, body, final_url, redirected, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                cache,
                key.method,
                key.url,
                response.status.as_u16(),
                headers,
                &response.body[..],
                response.url.as_str(),
                response.redirected,
                now,
            ],
        )?;
        Ok(())
    }
}

/// Header name and raw value bytes. Values need not be visible ASCII.
type StoredHeader = (String, Vec<u8>);

fn decode_response(
    status: u16,
    headers: String,
    body: Vec<u8>,
    final_url: String,
    redirected: bool,
) -> Result<Response, StorageError> {
    let status = StatusCode::from_u16(status).map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let url = Url::parse(&final_url).map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let pairs: Vec<StoredHeader> =
        serde_json::from_str(&headers).map_err(|e| StorageError::Corrupt(e.to_string()))?;

    let mut header_map = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let value =
            HeaderValue::from_bytes(&value).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        header_map.append(name, value);
    }

    Ok(Response {
        status,
        headers: header_map,
        body: body.into(),
        url,
        redirected,
    })
}

impl CacheStorage for SqliteCacheStorage {
    fn open(&mut self, cache: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
            params![cache, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT name FROM caches ORDER BY rowid")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for name in names {
            keys.push(name?);
        }
        Ok(keys)
    }

    fn delete(&mut self, cache: &str) -> Result<bool, StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cache_entries WHERE cache_name = ?1", params![cache])?;
        let removed = tx.execute("DELETE FROM caches WHERE name = ?1", params![cache])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<Response>, StorageError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT status, headers, body, final_url, redirected
                FROM cache_entries
                WHERE cache_name = ?1 AND method = ?2 AND url = ?3
                "#,
                params![cache, key.method, key.url],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(status, headers, body, final_url, redirected)| {
            decode_response(status, headers, body, final_url, redirected)
        })
        .transpose()
    }

    fn put(&mut self, cache: &str, key: &CacheKey, response: &Response) -> Result<(), StorageError> {
        Self::insert_entry(&self.conn, cache, key, response)
    }

    fn put_all(&mut self, cache: &str, entries: &[(CacheKey, Response)]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
            params![cache, Utc::now().to_rfc3339()],
        )?;
        for (key, response) in entries {
            Self::insert_entry(&tx, cache, key, response)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn entries(&self, cache: &str) -> Result<Vec<EntryInfo>, StorageError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT method, url, status, length(body), stored_at
            FROM cache_entries
            WHERE cache_name = ?1
            ORDER BY url
            "#,
        )?;

        let rows = stmt.query_map([cache], |row| {
            let stored_at: String = row.get(4)?;
            let stored_at = DateTime::parse_from_rfc3339(&stored_at)
                .map_err(|_| {
                    rusqlite::Error::InvalidColumnType(
                        4,
                        "stored_at".to_string(),
                        rusqlite::types::Type::Text,
                    )
                })?
                .with_timezone(&Utc);

            Ok(EntryInfo {
                key: CacheKey {
                    method: row.get(0)?,
                    url: row.get(1)?,
                },
                status: row.get(2)?,
                bytes: row.get::<_, i64>(3)? as usize,
                stored_at,
            })
        })?;

        let mut infos = Vec::new();
        for info in rows {
            infos.push(info?);
        }
        Ok(infos)
    }

    fn load_registration(&self) -> Result<Registration, StorageError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM registration WHERE key = 'registration'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| StorageError::Corrupt(e.to_string()))
            }
            None => Ok(Registration::default()),
        }
    }

    fn save_registration(&mut self, registration: &Registration) -> Result<(), StorageError> {
        let json = serde_json::to_string(registration)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO registration (key, value) VALUES ('registration', ?1)",
            params![json],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use tempfile::tempdir;

    fn url(path: &str) -> Url {
        Url::parse("https://resonant.example/").unwrap().join(path).unwrap()
    }

    fn entry(path: &str, body: &str) -> (CacheKey, Response) {
        let req = Request::get(url(path));
        let resp = Response::new(StatusCode::OK, url(path), body.to_string())
            .with_content_type("text/plain");
        (CacheKey::for_request(&req), resp)
    }

    fn exercise(storage: &mut dyn CacheStorage) {
        let (key, resp) = entry("/manifest.json", "{}");

        storage.put("v1", &key, &resp).unwrap();
        storage.open("v2").unwrap();
        assert_eq!(storage.keys().unwrap(), vec!["v1", "v2"]);

        let loaded = storage.get("v1", &key).unwrap().unwrap();
        assert_eq!(loaded, resp);
        assert!(storage.get("v2", &key).unwrap().is_none());

        assert!(storage.delete("v1").unwrap());
        assert!(!storage.delete("v1").unwrap());
        assert_eq!(storage.keys().unwrap(), vec!["v2"]);
        assert!(storage.get("v1", &key).unwrap().is_none());
    }

    #[test]
    fn test_memory_storage_roundtrip() {
        exercise(&mut MemoryCacheStorage::new());
    }

    #[test]
    fn test_sqlite_storage_roundtrip() {
        exercise(&mut SqliteCacheStorage::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_keeps_headers_and_flags() {
        let mut storage = SqliteCacheStorage::in_memory().unwrap();
        let (key, mut resp) = entry("/icon-192.png", "png");
        resp.redirected = true;
        resp.status = StatusCode::ACCEPTED;

        storage.put("v1", &key, &resp).unwrap();
        let loaded = storage.get("v1", &key).unwrap().unwrap();

        assert!(loaded.redirected);
        assert_eq!(loaded.status, StatusCode::ACCEPTED);
        assert_eq!(loaded.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn test_sqlite_keeps_opaque_and_repeated_header_values() {
        let mut storage = SqliteCacheStorage::in_memory().unwrap();
        let (key, mut resp) = entry("/", "<html>");
        let title = HeaderValue::from_bytes(b"caf\xe9").unwrap();
        resp.headers.insert("x-title", title.clone());
        resp.headers.append("set-cookie", HeaderValue::from_static("a=1"));
        resp.headers.append("set-cookie", HeaderValue::from_static("b=2"));

        storage.put("v1", &key, &resp).unwrap();
        let loaded = storage.get("v1", &key).unwrap().unwrap();

        assert_eq!(loaded.headers.get("x-title"), Some(&title));
        let cookies: Vec<_> = loaded.headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(loaded, resp);
    }

    #[test]
    fn test_sqlite_put_all_and_entries() {
        let mut storage = SqliteCacheStorage::in_memory().unwrap();
        let entries = vec![entry("/", "<html>"), entry("/manifest.json", "{}")];

        storage.put_all("v1", &entries).unwrap();
        let infos = storage.entries("v1").unwrap();

        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].key.url, "https://resonant.example/");
        assert_eq!(infos[0].bytes, 6);
        assert_eq!(infos[1].status, 200);
    }

    #[test]
    fn test_sqlite_registration_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("cache.db");
        let reg = Registration {
            active: Some("v1".parse().unwrap()),
            waiting: Some("v2".parse().unwrap()),
        };

        {
            let mut storage = SqliteCacheStorage::open_at(&path).unwrap();
            assert_eq!(storage.load_registration().unwrap(), Registration::default());
            storage.save_registration(&reg).unwrap();
            let (key, resp) = entry("/", "<html>");
            storage.put("v2", &key, &resp).unwrap();
        }

        let storage = SqliteCacheStorage::open_at(&path).unwrap();
        assert_eq!(storage.load_registration().unwrap(), reg);
        assert_eq!(storage.keys().unwrap(), vec!["v2"]);
    }

    #[test]
    fn test_cache_key_ignores_fragment() {
        let a = CacheKey::for_request(&Request::get(url("/index.html#top")));
        let b = CacheKey::for_request(&Request::get(url("/index.html")));
        assert_eq!(a, b);
    }
}
