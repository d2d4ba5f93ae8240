use super::{ChangeHub, KeyValueStore, Listener, ListenerId, StorageEvent};
use crate::error::{Error, Result};
use crate::store::lock;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct Shared {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
    hub: ChangeHub,
}

/// Storage backed by a single JSON object file.
///
/// The file is re-read on every access, so writes made by other processes
/// are visible to `get`. Change notifications only reach contexts opened in
/// this process.
#[derive(Clone)]
pub struct FileStorage {
    shared: Arc<Shared>,
    context: usize,
}

impl FileStorage {
    /// Open storage at `path`, creating parent directories if needed.
    ///
    /// The file itself is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| Error::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        tracing::debug!(path = %path.display(), "opened file storage");

        let hub = ChangeHub::default();
        let context = hub.next_context();
        Ok(Self {
            shared: Arc::new(Shared {
                path,
                write_lock: Mutex::new(()),
                hub,
            }),
            context,
        })
    }

    /// Open another context onto the same file.
    pub fn context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context: self.shared.hub.next_context(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let path = &self.shared.path;
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(Error::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| Error::Corrupt {
            path: path.clone(),
            source,
        })
    }

    fn save(&self, key: &str, entries: &BTreeMap<String, String>) -> Result<()> {
        let path = &self.shared.path;
        let io_err = |source| Error::Io {
            path: path.clone(),
            source,
        };
        let text = serde_json::to_string_pretty(entries).map_err(|source| Error::Serialize {
            key: key.to_string(),
            source,
        })?;

        // Write-then-rename so readers never see a partial file.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }

    fn modify(&self, key: &str, new_value: Option<&str>) -> Result<()> {
        let old_value = {
            let _guard = lock(&self.shared.write_lock);
            let mut entries = self.load()?;
            let old_value = match new_value {
                Some(value) => entries.insert(key.to_string(), value.to_string()),
                None => entries.remove(key),
            };
            if old_value.as_deref() == new_value {
                return Ok(());
            }
            self.save(key, &entries)?;
            old_value
        };

        self.shared.hub.broadcast(
            self.context,
            &StorageEvent {
                key: key.to_string(),
                old_value,
                new_value: new_value.map(str::to_string),
            },
        );
        Ok(())
    }
}

impl KeyValueStore for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.modify(key, Some(value))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.modify(key, None)
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.shared.hub.add(self.context, listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.shared.hub.remove(id);
    }
}
