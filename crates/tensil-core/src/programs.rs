//! Named kernel programs: filesystem resolution, compilation, caching.
//!
//! Programs are loaded from a configured search path, one `<name>.cu`
//! source unit per program name, compiled once per context lifetime and
//! cached. The cache is optimized for the read-heavy steady state after
//! warm-up: lookups take a shared lock, only a cache miss takes the
//! exclusive lock to load and compile.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// A compiled kernel program.
#[derive(Debug)]
pub struct Program {
    name: String,
    source: String,
    #[cfg(feature = "cuda")]
    ptx: cudarc::nvrtc::Ptx,
}

impl Program {
    /// Program name (the source file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The program source as loaded from disk.
    pub fn source(&self) -> &str {
        &self.source
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn ptx(&self) -> &cudarc::nvrtc::Ptx {
        &self.ptx
    }
}

/// Handle to one kernel inside a cached program.
#[derive(Debug, Clone)]
pub struct KernelHandle {
    program: Arc<Program>,
    kernel: String,
}

impl KernelHandle {
    /// The program this kernel belongs to.
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Kernel (entry point) name.
    pub fn kernel(&self) -> &str {
        &self.kernel
    }
}

/// Compilation cache for named kernel programs, shared by every operation
/// that does not carry its own.
pub struct ProgramCache {
    search_paths: Vec<PathBuf>,
    programs: RwLock<HashMap<String, Arc<Program>>>,
}

impl ProgramCache {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            programs: RwLock::new(HashMap::new()),
        }
    }

    /// Look up `kernel` in `program`, loading and compiling the program on
    /// first access.
    ///
    /// A missing program source is [`Error::ProgramNotFound`]; a compile
    /// failure is [`Error::KernelCompile`] carrying the full build log.
    /// Both are recoverable by the caller.
    pub fn get(&self, program: &str, kernel: &str) -> Result<KernelHandle> {
        if let Some(p) = self.programs.read().get(program) {
            return Ok(KernelHandle {
                program: Arc::clone(p),
                kernel: kernel.to_string(),
            });
        }

        let mut map = self.programs.write();
        // Another thread may have compiled it while we waited.
        if let Some(p) = map.get(program) {
            return Ok(KernelHandle {
                program: Arc::clone(p),
                kernel: kernel.to_string(),
            });
        }

        let source = self.load_source(program)?;
        let compiled = Arc::new(compile(program, source)?);
        tracing::debug!(program, "kernel program compiled and cached");
        map.insert(program.to_string(), Arc::clone(&compiled));
        Ok(KernelHandle {
            program: compiled,
            kernel: kernel.to_string(),
        })
    }

    /// Whether a program is already compiled and cached.
    pub fn is_cached(&self, program: &str) -> bool {
        self.programs.read().contains_key(program)
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.programs.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.programs.read().is_empty()
    }

    fn load_source(&self, program: &str) -> Result<String> {
        let file = format!("{program}.cu");
        for dir in &self.search_paths {
            let path = dir.join(&file);
            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|e| Error::Backend(format!(
                    "failed to read kernel source {}: {e}",
                    path.display()
                )));
            }
        }
        Err(Error::ProgramNotFound {
            program: program.to_string(),
            searched: self.search_paths.clone(),
        })
    }
}

#[cfg(feature = "cuda")]
fn compile(name: &str, source: String) -> Result<Program> {
    match cudarc::nvrtc::compile_ptx(&source) {
        Ok(ptx) => Ok(Program {
            name: name.to_string(),
            source,
            ptx,
        }),
        Err(e) => {
            let log = e.to_string();
            tracing::error!(program = name, %log, "kernel compilation failed");
            Err(Error::KernelCompile {
                program: name.to_string(),
                log,
            })
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn compile(name: &str, source: String) -> Result<Program> {
    // Host build: there is no device compiler; the program is validated to
    // exist and its source retained so handles stay inspectable.
    Ok(Program {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_kernel_dir(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tensil-programs-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join(format!("{name}.cu"))).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        dir
    }

    #[test]
    fn test_missing_program_lists_search_path() {
        let cache = ProgramCache::new(vec![PathBuf::from("/nonexistent/a"), PathBuf::from("/nonexistent/b")]);
        let err = cache.get("gemm", "gemm_f32").unwrap_err();
        match err {
            Error::ProgramNotFound { program, searched } => {
                assert_eq!(program, "gemm");
                assert_eq!(searched.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lookup_compiles_once_and_caches() {
        let dir = temp_kernel_dir("elementwise", "extern \"C\" __global__ void fill_f32() {}\n");
        let cache = ProgramCache::new(vec![dir]);
        assert!(!cache.is_cached("elementwise"));

        let h = cache.get("elementwise", "fill_f32").unwrap();
        assert_eq!(h.program().name(), "elementwise");
        assert_eq!(h.kernel(), "fill_f32");
        assert!(cache.is_cached("elementwise"));
        assert_eq!(cache.len(), 1);

        // Second lookup hits the cache and shares the program.
        let h2 = cache.get("elementwise", "scale_f32").unwrap();
        assert!(Arc::ptr_eq(h.program(), h2.program()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_lookup() {
        let dir = temp_kernel_dir("reduce", "extern \"C\" __global__ void sum_f32() {}\n");
        let cache = Arc::new(ProgramCache::new(vec![dir]));

        std::thread::scope(|s| {
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                s.spawn(move || {
                    for _ in 0..50 {
                        cache.get("reduce", "sum_f32").unwrap();
                    }
                });
            }
        });
        assert_eq!(cache.len(), 1);
    }
}
