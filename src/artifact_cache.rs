//! Compiled-artifact cache keyed by content hash.
//!
//! - Single-flight: concurrent callers for one hash wait on that hash's slot
//!   while the first one compiles; other hashes are not blocked.
//! - Failures are never cached; the slot is dropped and the next caller
//!   compiles again.
//! - Entries idle for longer than the configured window are evicted on the
//!   next access (or by an explicit [`ArtifactCache::evict_idle`] sweep).
//! - There is no capacity limit.
//!
//! A [`CompiledScript`] holds the validated program text, not QuickJS
//! bytecode. The cache memoizes static validation and the syntax check;
//! QuickJS still parses the program on every invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::extensions_js::ScriptRuntime;
use crate::model::content_hash;
use crate::validator;

/// Immutable prepared form of a script, shared by every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScript {
    content_hash: String,
    program: Arc<str>,
}

impl CompiledScript {
    pub fn new(content_hash: impl Into<String>, program: impl Into<Arc<str>>) -> Self {
        Self {
            content_hash: content_hash.into(),
            program: program.into(),
        }
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Turns source text into a [`CompiledScript`].
pub trait ScriptCompiler: Send + Sync {
    fn compile(&self, content_hash: &str, source: &str) -> Result<CompiledScript>;
}

/// Validator pass plus a QuickJS syntax check.
pub struct QuickJsCompiler {
    runtime: Arc<ScriptRuntime>,
}

impl QuickJsCompiler {
    pub const fn new(runtime: Arc<ScriptRuntime>) -> Self {
        Self { runtime }
    }
}

impl ScriptCompiler for QuickJsCompiler {
    fn compile(&self, hash: &str, source: &str) -> Result<CompiledScript> {
        if content_hash(source) != hash {
            return Err(Error::compile(hash, "source does not match its content hash"));
        }
        validator::validate(source).map_err(|err| Error::compile(hash, err.to_string()))?;
        self.runtime.check_syntax(hash, source)?;
        Ok(CompiledScript::new(hash, source))
    }
}

struct Slot {
    artifact: Mutex<Option<Arc<CompiledScript>>>,
    last_access_ms: AtomicU64,
}

impl Slot {
    fn new(now_ms: u64) -> Self {
        Self {
            artifact: Mutex::new(None),
            last_access_ms: AtomicU64::new(now_ms),
        }
    }
}

pub struct ArtifactCache {
    compiler: Arc<dyn ScriptCompiler>,
    clock: SharedClock,
    idle_ms: u64,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    compilations: AtomicU64,
}

impl ArtifactCache {
    pub fn new(compiler: Arc<dyn ScriptCompiler>, clock: SharedClock, idle: Duration) -> Self {
        Self {
            compiler,
            clock,
            idle_ms: u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
            slots: Mutex::new(HashMap::new()),
            compilations: AtomicU64::new(0),
        }
    }

    /// Return the artifact for `content_hash`, compiling it from `source` on
    /// a miss. `source` is only called on a miss.
    pub fn get_or_compile<F>(&self, content_hash: &str, source: F) -> Result<Arc<CompiledScript>>
    where
        F: FnOnce() -> Result<String>,
    {
        let now = self.clock.now_ms();
        self.evict_idle_at(now);

        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                slots
                    .entry(content_hash.to_string())
                    .or_insert_with(|| Arc::new(Slot::new(now))),
            )
        };
        slot.last_access_ms.store(now, AtomicOrdering::SeqCst);

        let mut artifact = slot.artifact.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = artifact.as_ref() {
            debug!(event = "artifact.hit", content_hash, "Artifact cache hit");
            return Ok(Arc::clone(compiled));
        }

        match source().and_then(|source| self.compiler.compile(content_hash, &source)) {
            Ok(compiled) => {
                let compiled = Arc::new(compiled);
                *artifact = Some(Arc::clone(&compiled));
                self.compilations.fetch_add(1, AtomicOrdering::SeqCst);
                info!(event = "artifact.compiled", content_hash, "Compiled script artifact");
                Ok(compiled)
            }
            Err(err) => {
                drop(artifact);
                let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
                if slots
                    .get(content_hash)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot))
                {
                    slots.remove(content_hash);
                }
                warn!(
                    event = "artifact.compile_failed",
                    content_hash,
                    error = %err,
                    "Script compilation failed"
                );
                Err(err)
            }
        }
    }

    /// Drop the entry for `content_hash`. A compile already in flight for it
    /// finishes for its own caller but is not reused.
    pub fn invalidate(&self, content_hash: &str) -> bool {
        let removed = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(content_hash)
            .is_some();
        if removed {
            debug!(event = "artifact.invalidated", content_hash, "Artifact invalidated");
        }
        removed
    }

    /// Evict every entry idle for at least the configured window.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(self.clock.now_ms())
    }

    fn evict_idle_at(&self, now: u64) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| {
            now.saturating_sub(slot.last_access_ms.load(AtomicOrdering::SeqCst)) < self.idle_ms
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(event = "artifact.evicted", evicted, "Evicted idle artifacts");
        }
        evicted
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(content_hash)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful compilations since construction.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crate::clock::ManualClock;

    const HOUR: Duration = Duration::from_secs(3_600);

    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl ScriptCompiler for CountingCompiler {
        fn compile(&self, hash: &str, source: &str) -> Result<CompiledScript> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.fail {
                return Err(Error::compile(hash, "boom"));
            }
            Ok(CompiledScript::new(hash, source))
        }
    }

    fn cache(compiler: Arc<CountingCompiler>, clock: Arc<ManualClock>) -> ArtifactCache {
        ArtifactCache::new(compiler, clock, HOUR)
    }

    #[test]
    fn second_lookup_hits_without_compiling() {
        let compiler = Arc::new(CountingCompiler::default());
        let cache = cache(compiler.clone(), Arc::new(ManualClock::new(0)));

        let first = cache.get_or_compile("h1", || Ok("src".into())).expect("first");
        let second = cache
            .get_or_compile("h1", || panic!("source must not be read on a hit"))
            .expect("second");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(cache.compilations(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let compiler = Arc::new(CountingCompiler {
            fail: true,
            ..CountingCompiler::default()
        });
        let cache = cache(compiler.clone(), Arc::new(ManualClock::new(0)));
        for _ in 0..2 {
            let err = cache.get_or_compile("bad", || Ok("src".into())).expect_err("fails");
            assert!(matches!(err, Error::Compile { .. }));
        }
        assert_eq!(compiler.calls.load(AtomicOrdering::SeqCst), 2);
        assert!(!cache.contains("bad"));
    }

    #[test]
    fn supplier_errors_propagate() {
        let compiler = Arc::new(CountingCompiler::default());
        let cache = cache(compiler.clone(), Arc::new(ManualClock::new(0)));
        let err = cache
            .get_or_compile("h", || Err(Error::store("gone")))
            .expect_err("supplier");
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(compiler.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn invalidate_forces_recompile() {
        let compiler = Arc::new(CountingCompiler::default());
        let cache = cache(compiler.clone(), Arc::new(ManualClock::new(0)));
        cache.get_or_compile("h", || Ok("a".into())).expect("compile");
        assert!(cache.invalidate("h"));
        assert!(!cache.invalidate("h"));
        cache.get_or_compile("h", || Ok("a".into())).expect("recompile");
        assert_eq!(compiler.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn idle_entries_are_evicted_and_touched_entries_survive() {
        let compiler = Arc::new(CountingCompiler::default());
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(compiler.clone(), clock.clone());

        cache.get_or_compile("old", || Ok("a".into())).expect("old");
        cache.get_or_compile("hot", || Ok("b".into())).expect("hot");
        clock.advance(59 * 60 * 1_000);
        cache.get_or_compile("hot", || Ok("b".into())).expect("touch");
        clock.advance(2 * 60 * 1_000);

        assert_eq!(cache.evict_idle(), 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("hot"));
        assert_eq!(compiler.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn concurrent_callers_compile_once() {
        let compiler = Arc::new(CountingCompiler {
            delay: Some(Duration::from_millis(50)),
            ..CountingCompiler::default()
        });
        let cache = Arc::new(cache(compiler.clone(), Arc::new(ManualClock::new(0))));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compile("shared", || Ok("src".into()))
                        .expect("compile")
                })
            })
            .collect();
        let artifacts: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();

        assert_eq!(compiler.calls.load(AtomicOrdering::SeqCst), 1);
        assert!(artifacts.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
