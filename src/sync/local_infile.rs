use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use auto_impl::auto_impl;

use crate::error::{Error, Result};

/// Supplies file content for `LOAD DATA LOCAL INFILE`.
///
/// The server names the file it wants; the handler decides whether and how
/// to open it. Returning an error still lets the exchange finish: the client
/// sends an empty file and reports the error afterwards.
#[auto_impl(&mut, Box)]
pub trait LocalInfileHandler: Send {
    fn open(&mut self, file_name: &str) -> Result<Box<dyn Read + Send>>;
}

/// Serves files below one directory and refuses everything else
#[derive(Debug, Clone)]
pub struct DirectoryInfileHandler {
    root: PathBuf,
}

impl DirectoryInfileHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LocalInfileHandler for DirectoryInfileHandler {
    fn open(&mut self, file_name: &str) -> Result<Box<dyn Read + Send>> {
        let root = self.root.canonicalize()?;
        let path = root.join(file_name).canonicalize()?;
        if !path.starts_with(&root) {
            return Err(Error::LocalInfileDisabled(format!(
                "'{file_name}' is outside {}",
                root.display()
            )));
        }
        Ok(Box::new(File::open(path)?))
    }
}
