use std::env;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> MutexGuard<'static, ()> {
    match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(g) => g,
        // If a previous test panicked while holding the lock, recover so subsequent
        // tests can still run (these tests serialize env var changes).
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// RAII guard for test-only env var mutation.
///
/// Best-effort parallel safety: all mutations using this guard are serialized
/// with a global lock, but external mutations (other tests not using this
/// helper) are not controlled.
#[must_use]
#[allow(dead_code)]
pub struct EnvVarGuard {
    key: String,
    old: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

/// Restores several env vars at once under a single lock acquisition.
#[must_use]
#[allow(dead_code)]
pub struct EnvVarGuardMulti {
    entries: Vec<(String, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

#[allow(dead_code)]
impl EnvVarGuard {
    pub fn set<K: Into<String>, V: AsRef<OsStr>>(key: K, value: V) -> Self {
        let key = key.into();
        let lock = env_lock();
        let old = env::var_os(&key);

        // NOTE: On recent Rust toolchains, env var mutation is marked unsafe due to
        // potential undefined behavior when used concurrently across threads.
        // We guard with ENV_LOCK to keep tests deterministic.
        #[allow(unused_unsafe)]
        unsafe {
            env::set_var(&key, value);
        }

        Self {
            key,
            old,
            _lock: lock,
        }
    }

    pub fn unset<K: Into<String>>(key: K) -> Self {
        let key = key.into();
        let lock = env_lock();
        let old = env::var_os(&key);

        #[allow(unused_unsafe)]
        unsafe {
            env::remove_var(&key);
        }

        Self {
            key,
            old,
            _lock: lock,
        }
    }

    pub fn set_many(pairs: &[(&str, &OsStr)]) -> EnvVarGuardMulti {
        let lock = env_lock();
        let mut entries = Vec::with_capacity(pairs.len());
        for (key, value) in pairs.iter() {
            let key_string = (*key).to_string();
            let old = env::var_os(&key_string);
            #[allow(unused_unsafe)]
            unsafe {
                env::set_var(&key_string, value);
            }
            entries.push((key_string, old));
        }

        EnvVarGuardMulti {
            entries,
            _lock: lock,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        #[allow(unused_unsafe)]
        unsafe {
            match &self.old {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }
}

impl Drop for EnvVarGuardMulti {
    fn drop(&mut self) {
        for (key, old) in self.entries.iter() {
            #[allow(unused_unsafe)]
            unsafe {
                match old {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Tracks how many tasks are inside their compute section at once.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct ConcurrencyGauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ConcurrencyGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the section; the returned guard leaves it on drop.
    pub fn enter(&self) -> GaugeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
pub fn unique_test_temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = env::temp_dir().join(format!("parexec-{prefix}-{}-{n}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
