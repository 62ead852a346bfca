//! File and function references, plus the temp-path allocator used to bridge
//! one job's output into another job's input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a loader, storer, comparator or UDF by name plus constructor
/// arguments. The executor resolves these; the compiler only ships them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FuncSpec {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl FuncSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: vec![],
        }
    }

    pub fn with_args<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for FuncSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}('{}')", self.name, self.args.join("', '"))
        }
    }
}

/// A path plus the serializer used to read or write it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    pub func: FuncSpec,
}

impl FileSpec {
    pub fn new(path: impl Into<String>, func: FuncSpec) -> Self {
        Self {
            path: path.into(),
            func,
        }
    }
}

impl fmt::Display for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} using {}", self.path, self.func)
    }
}

/// Hands out private temp file specs.
///
/// Names are a pure function of `(seed, counter)`: a blake3 keyed stream
/// shaped into a v4 UUID. Reseeding reproduces the same sequence, which is
/// what deterministic tests rely on.
#[derive(Debug, Clone)]
pub struct TempAllocator {
    dir: String,
    serializer: FuncSpec,
    key: [u8; 32],
    counter: u64,
}

impl TempAllocator {
    pub fn new(dir: impl Into<String>, serializer: FuncSpec, seed: u64) -> Self {
        let mut alloc = Self {
            dir: dir.into(),
            serializer,
            key: [0; 32],
            counter: 0,
        };
        alloc.reseed(seed);
        alloc
    }

    /// Restart the name sequence from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.key = *blake3::hash(&seed.to_le_bytes()).as_bytes();
        self.counter = 0;
    }

    pub fn serializer(&self) -> &FuncSpec {
        &self.serializer
    }

    pub fn next_spec(&mut self) -> FileSpec {
        let digest = blake3::keyed_hash(&self.key, &self.counter.to_le_bytes());
        self.counter += 1;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        let name = uuid::Builder::from_random_bytes(bytes).into_uuid();
        FileSpec::new(
            format!("{}/tmp-{}", self.dir.trim_end_matches('/'), name),
            self.serializer.clone(),
        )
    }

    /// True if `file` lives under this allocator's temp directory.
    pub fn is_temp(&self, file: &FileSpec) -> bool {
        file.path
            .strip_prefix(self.dir.trim_end_matches('/'))
            .map(|rest| rest.starts_with("/tmp-"))
            .unwrap_or(false)
    }
}
