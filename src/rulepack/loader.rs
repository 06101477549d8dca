// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Rule pack loading, caching, and hot reload.
//
// Packs are cached process-wide by resolved path; every scan asks the
// handle for the current pack, which re-checks the file mtime behind a
// debounce. A failed reload keeps the previous compiled pack and logs at
// error level -- a running audit never loses its rules. The first load is
// fatal on error.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;

use super::{compile_str, CompiledRulePack};
use crate::error::AuditError;

/// Minimum interval between mtime checks.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

static CACHE: OnceLock<DashMap<PathBuf, Arc<CachedPack>>> = OnceLock::new();

fn cache() -> &'static DashMap<PathBuf, Arc<CachedPack>> {
    CACHE.get_or_init(DashMap::new)
}

#[derive(Debug)]
struct CachedPack {
    path: PathBuf,
    pack: RwLock<Arc<CompiledRulePack>>,
    mtime: Mutex<Option<SystemTime>>,
    last_check: Mutex<Instant>,
    debounce: Duration,
}

/// A shared handle onto a cached, hot-reloadable pack.
#[derive(Clone, Debug)]
pub struct RulePackHandle {
    cached: Arc<CachedPack>,
}

impl RulePackHandle {
    /// Load (or reuse) the pack at `path`. Compile errors on first load are
    /// fatal.
    pub fn load(path: &Path) -> Result<Self, AuditError> {
        Self::load_with_debounce(path, DEFAULT_DEBOUNCE)
    }

    pub fn load_with_debounce(path: &Path, debounce: Duration) -> Result<Self, AuditError> {
        let resolved = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        if let Some(existing) = cache().get(&resolved) {
            return Ok(Self {
                cached: existing.clone(),
            });
        }

        let (pack, mtime) = read_and_compile(&resolved)?;
        let cached = Arc::new(CachedPack {
            path: resolved.clone(),
            pack: RwLock::new(Arc::new(pack)),
            mtime: Mutex::new(mtime),
            last_check: Mutex::new(Instant::now()),
            debounce,
        });
        cache().insert(resolved, cached.clone());
        Ok(Self { cached })
    }

    /// The current compiled pack, reloading first if the file changed.
    ///
    /// Readers always observe a fully compiled pack: the swap replaces the
    /// shared `Arc` atomically under the lock.
    pub fn current(&self) -> Arc<CompiledRulePack> {
        self.maybe_reload();
        self.cached
            .pack
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Drop this pack from the process-wide cache.
    pub fn close(&self) {
        cache().remove(&self.cached.path);
    }

    fn maybe_reload(&self) {
        {
            let mut last = self
                .cached
                .last_check
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if last.elapsed() < self.cached.debounce {
                return;
            }
            *last = Instant::now();
        }

        let current_mtime = file_mtime(&self.cached.path);
        {
            let known = self
                .cached
                .mtime
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if current_mtime == *known {
                return;
            }
        }

        match read_and_compile(&self.cached.path) {
            Ok((pack, mtime)) => {
                tracing::info!(
                    path = %self.cached.path.display(),
                    version = %pack.version,
                    rules = pack.len(),
                    "rule pack reloaded"
                );
                *self
                    .cached
                    .pack
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(pack);
                *self
                    .cached
                    .mtime
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = mtime;
            }
            Err(err) => {
                // Retryable: the previous compiled pack stays live.
                tracing::error!(
                    path = %self.cached.path.display(),
                    error = %err,
                    "rule pack reload failed; keeping previous pack"
                );
            }
        }
    }
}

fn read_and_compile(path: &Path) -> Result<(CompiledRulePack, Option<SystemTime>), AuditError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AuditError::AssetMissing(path.display().to_string())
        } else {
            AuditError::RulePackLoad {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        }
    })?;
    let pack = compile_str(&content, &path.display().to_string())?;
    Ok((pack, file_mtime(path)))
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
