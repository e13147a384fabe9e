//! `.env`-style credential store
//!
//! The store file is the single source of truth for the client identity,
//! the PKCE pair, the pending authorization code and the token pair. It is
//! a flat list of `KEY=VALUE` lines; comments, blank lines and keys this
//! crate doesn't know about are carried through every rewrite untouched.
//!
//! Every write goes through `write_atomic` (temp file + fsync + rename), so
//! a crash mid-write leaves either the old file or the new one. There is no
//! locking: callers must not run two writers against one file.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::constants::keys;
use crate::error::{Error, Result};

/// One line of the store file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// `KEY=VALUE`; `raw` is kept so untouched entries are rewritten verbatim.
    Entry { key: String, raw: String },
    /// Comment, blank line, or anything without `=`.
    Other(String),
}

impl Line {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('#') {
            return Line::Other(raw.to_owned());
        }
        match trimmed.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => Line::Entry {
                key: key.trim().to_owned(),
                raw: raw.to_owned(),
            },
            _ => Line::Other(raw.to_owned()),
        }
    }

    /// Values that would read back differently (surrounding whitespace or
    /// quotes) are written double-quoted.
    fn entry(key: &str, value: &str) -> Self {
        let plain = format!("{key}={value}");
        let raw = if parse_value(&plain) == value {
            plain
        } else {
            format!("{key}=\"{value}\"")
        };
        Line::Entry {
            key: key.to_owned(),
            raw,
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Line::Entry { raw, .. } | Line::Other(raw) => raw,
        }
    }
}

/// Unquote `"value"` / `'value'` and trim surrounding whitespace.
fn parse_value(raw: &str) -> String {
    let value = raw.split_once('=').map(|(_, v)| v).unwrap_or_default().trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| {
            value
                .strip_prefix(*q)
                .and_then(|rest| rest.strip_suffix(*q))
        })
        .unwrap_or(value);
    unquoted.to_owned()
}

/// The file as an ordered list of lines.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Document {
    lines: Vec<Line>,
    /// Line ending of the first line; reused for the whole file on render
    newline: &'static str,
}

impl Document {
    fn parse(contents: &str) -> Self {
        let crlf = contents
            .find('\n')
            .is_some_and(|at| contents[..at].ends_with('\r'));
        let lines = contents
            .split('\n')
            .map(|line| if crlf { line.strip_suffix('\r').unwrap_or(line) } else { line })
            .map(Line::parse)
            .collect();
        Self {
            lines,
            newline: if crlf { "\r\n" } else { "\n" },
        }
    }

    fn render(&self) -> String {
        self.lines
            .iter()
            .map(Line::as_str)
            .collect::<Vec<_>>()
            .join(self.newline)
    }

    /// Replace every entry for `key`, or append one.
    ///
    /// Appends go before a trailing empty line so a file ending in a newline
    /// keeps ending in one.
    fn upsert(&mut self, key: &str, value: &str) {
        let mut found = false;
        for line in &mut self.lines {
            if matches!(line, Line::Entry { key: k, .. } if k.as_str() == key) {
                *line = Line::entry(key, value);
                found = true;
            }
        }
        if found {
            return;
        }

        let at = match self.lines.last() {
            Some(Line::Other(last)) if last.is_empty() => self.lines.len() - 1,
            _ => self.lines.len(),
        };
        self.lines.insert(at, Line::entry(key, value));
    }

    fn state(&self) -> CredentialState {
        let mut entries: Vec<(String, String)> = Vec::new();
        for line in &self.lines {
            if let Line::Entry { key, raw } = line {
                let value = parse_value(raw);
                match entries.iter_mut().find(|(k, _)| k == key) {
                    Some(existing) => existing.1 = value,
                    None => entries.push((key.clone(), value)),
                }
            }
        }
        CredentialState { entries }
    }
}

/// Parsed snapshot of the store, in file order.
///
/// Empty values read as absent, so `AUTHORIZATION_CODE=` is a placeholder
/// the user can paste into.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialState {
    entries: Vec<(String, String)>,
}

impl CredentialState {
    /// Build a state from key/value pairs (later duplicates win).
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (key, value) in pairs {
            let (key, value) = (key.into(), value.into());
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => entries.push((key, value)),
            }
        }
        Self { entries }
    }

    /// Value for `key`, `None` if missing or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// All entries including unknown keys, in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn client_id(&self) -> Option<&str> {
        self.get(keys::CLIENT_ID)
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.get(keys::CLIENT_SECRET)
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.get(keys::REDIRECT_URI)
    }

    pub fn code_verifier(&self) -> Option<&str> {
        self.get(keys::CODE_VERIFIER)
    }

    pub fn code_challenge(&self) -> Option<&str> {
        self.get(keys::CODE_CHALLENGE)
    }

    pub fn authorization_code(&self) -> Option<&str> {
        self.get(keys::AUTHORIZATION_CODE)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get(keys::ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.get(keys::REFRESH_TOKEN)
    }

    /// Access token expiry in unix seconds; unparseable values read as unknown.
    pub fn token_expires_at(&self) -> Option<u64> {
        self.get(keys::TOKEN_EXPIRES_AT)
            .and_then(|v| v.parse().ok())
    }
}

impl fmt::Debug for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.entries {
            if keys::SECRET_KEYS.contains(&key.as_str()) && !value.is_empty() {
                map.entry(key, &"[REDACTED]");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

/// Handle on the credential file. Holds no cached state: every `load`
/// reads the file, every `upsert` re-reads, edits and rewrites it.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Open an existing store. The file must already exist, provisioned
    /// with at least the client identity.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(Error::Io(format!(
                    "credential store {} is not a regular file",
                    path.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::StoreNotFound(path));
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "inspecting credential store {}: {e}",
                    path.display()
                )));
            }
        }
        debug!(path = %path.display(), "opened credential store");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the store.
    pub async fn load(&self) -> Result<CredentialState> {
        let state = self.read_document().await?.state();
        debug!(path = %self.path.display(), keys = state.entries.len(), "loaded credential state");
        Ok(state)
    }

    /// Set one key, preserving everything else.
    pub async fn upsert(&self, key: &str, value: &str) -> Result<()> {
        self.upsert_all(&[(key, value)]).await
    }

    /// Set several keys in one atomic write.
    ///
    /// Nothing is written if any key or value is invalid.
    pub async fn upsert_all(&self, pairs: &[(&str, &str)]) -> Result<()> {
        for (key, value) in pairs {
            validate(key, value)?;
        }

        let mut document = self.read_document().await?;
        let before = document.clone();
        for (key, value) in pairs {
            document.upsert(key, value);
        }

        if document == before {
            debug!(path = %self.path.display(), "credential store already up to date");
            return Ok(());
        }

        write_atomic(&self.path, &document.render()).await?;
        let updated: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
        info!(path = %self.path.display(), keys = ?updated, "credential store updated");
        Ok(())
    }

    async fn read_document(&self) -> Result<Document> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Document::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::StoreNotFound(self.path.clone()))
            }
            Err(e) => Err(Error::Io(format!(
                "reading credential store {}: {e}",
                self.path.display()
            ))),
        }
    }
}

fn validate(key: &str, value: &str) -> Result<()> {
    if key.trim().is_empty() || key.contains('=') || key.contains(['\n', '\r']) {
        return Err(Error::InvalidValue(format!("invalid key {key:?}")));
    }
    if value.contains(['\n', '\r']) {
        return Err(Error::InvalidValue(format!(
            "value for {key} contains a line break"
        )));
    }
    Ok(())
}

/// Write the store atomically.
///
/// Writes a temp file in the same directory, syncs it, then renames it over
/// the target. Sets 0600 on unix since the file holds the client secret and
/// tokens.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let result = write_and_rename(&tmp_path, path, contents).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

async fn write_and_rename(tmp_path: &Path, path: &Path, contents: &str) -> Result<()> {
    {
        let mut file = tokio::fs::File::create(tmp_path)
            .await
            .map_err(|e| Error::Io(format!("creating temp credential file: {e}")))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Io(format!("syncing temp credential file: {e}")))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential store");
    Ok(())
}
