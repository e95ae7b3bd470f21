use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::diagnostic::Diagnostic;

/// Options controlling what the driver writes besides the VM program.
#[derive(Clone, Debug, Default)]
pub struct CompileOptions {
    /// Write JSON symbol-table dumps next to the VM output.
    pub dump_symbols: bool,
}

/// A failure at the driver level: bad input paths, filesystem errors, or a
/// compilation error in one file.
#[derive(Debug)]
pub enum DriverError {
    Io { path: PathBuf, source: io::Error },
    NotAJackFile(PathBuf),
    NoSources(PathBuf),
    Compile {
        path: PathBuf,
        source_text: String,
        diagnostic: Diagnostic,
    },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            DriverError::NotAJackFile(path) => write!(
                f,
                "'{}' does not exist or is not a .jack file",
                path.display()
            ),
            DriverError::NoSources(path) => {
                write!(f, "no .jack files found in '{}'", path.display())
            }
            DriverError::Compile { path, diagnostic, .. } => {
                write!(f, "{}: {}", path.display(), diagnostic.message)
            }
        }
    }
}

impl std::error::Error for DriverError {}

impl DriverError {
    /// Print the error to stderr. Compile errors render the full source
    /// report; everything else is a one-liner.
    pub fn report(&self) {
        match self {
            DriverError::Compile {
                path,
                source_text,
                diagnostic,
            } => diagnostic.render(&path.display().to_string(), source_text),
            other => eprintln!("error: {}", other),
        }
    }
}

/// Resolve the input path to the list of `.jack` files to compile.
///
/// A file must have the `.jack` extension; a directory yields its `.jack`
/// files (non-recursive), sorted for deterministic batch order.
pub fn collect_sources(input: &Path) -> Result<Vec<PathBuf>, DriverError> {
    if input.is_dir() {
        let entries = fs::read_dir(input).map_err(|source| DriverError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let mut sources: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jack"))
            .collect();
        if sources.is_empty() {
            return Err(DriverError::NoSources(input.to_path_buf()));
        }
        sources.sort();
        Ok(sources)
    } else if input.is_file() && input.extension().is_some_and(|ext| ext == "jack") {
        Ok(vec![input.to_path_buf()])
    } else {
        Err(DriverError::NotAJackFile(input.to_path_buf()))
    }
}

/// Compile one `.jack` file to `<dir>/vm/<Class>.vm` and return the output
/// path. Nothing is written unless the whole file compiles, so a failed run
/// leaves no partial `.vm` behind.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<PathBuf, DriverError> {
    let source = fs::read_to_string(path).map_err(|source| DriverError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let basename = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| DriverError::NotAJackFile(path.to_path_buf()))?
        .to_string();

    let compiled =
        crate::compile_source(&source, &basename).map_err(|diagnostic| DriverError::Compile {
            path: path.to_path_buf(),
            source_text: source.clone(),
            diagnostic,
        })?;

    let vm_dir = path.parent().unwrap_or_else(|| Path::new("")).join("vm");
    fs::create_dir_all(&vm_dir).map_err(|source| DriverError::Io {
        path: vm_dir.clone(),
        source,
    })?;

    let vm_path = vm_dir.join(format!("{}.vm", basename));
    fs::write(&vm_path, &compiled.vm).map_err(|source| DriverError::Io {
        path: vm_path.clone(),
        source,
    })?;

    if options.dump_symbols {
        let dump_dir = vm_dir.join("symbol_tables");
        compiled
            .symbols
            .write_dumps(&dump_dir)
            .map_err(|source| DriverError::Io {
                path: dump_dir,
                source,
            })?;
    }

    Ok(vm_path)
}
