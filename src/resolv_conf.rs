// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Management of the host's resolver file.

use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use log::{debug, info};

/// Errors from reading or writing the resolver file.
#[derive(Debug, thiserror::Error)]
pub enum ResolvConfError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Points the host's resolver file at the local cache, and puts the
/// previous content back on shutdown.
#[derive(Debug)]
pub struct ResolvConfManager {
    path: PathBuf,
    listen_address: IpAddr,
    options: String,
    /// The content found before the first write; `None` inside means
    /// there was no file.
    original: Option<Option<String>>,
    altered: bool,
}

impl ResolvConfManager {
    pub fn new(path: PathBuf, listen_address: IpAddr, options: String) -> Self {
        Self {
            path,
            listen_address,
            options,
            original: None,
            altered: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_altered(&self) -> bool {
        self.altered
    }

    /// Remembers the current content and writes the canonical file.
    pub fn set(&mut self, search_domains: &[String]) -> Result<(), ResolvConfError> {
        let current = match fs::read_to_string(&self.path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(ResolvConfError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        self.original = Some(current);
        self.write(search_domains)?;
        self.altered = true;
        info!("Pointed {} at {}.", self.path.display(), self.listen_address);
        Ok(())
    }

    /// Rewrites the canonical file with new search domains.
    pub fn update(&mut self, search_domains: &[String]) -> Result<(), ResolvConfError> {
        if !self.altered {
            return self.set(search_domains);
        }
        self.write(search_domains)
    }

    /// Restores the content found by [`set`](Self::set). Does nothing if
    /// the file was never altered.
    pub fn revert(&mut self) -> Result<(), ResolvConfError> {
        if !self.altered {
            return Ok(());
        }
        match self.original.take().flatten() {
            Some(content) => fs::write(&self.path, content).map_err(|source| {
                ResolvConfError::Write {
                    path: self.path.clone(),
                    source,
                }
            })?,
            None => match fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    return Err(ResolvConfError::Remove {
                        path: self.path.clone(),
                        source: e,
                    })
                }
                _ => (),
            },
        }
        self.altered = false;
        info!("Restored the original {}.", self.path.display());
        Ok(())
    }

    fn write(&self, search_domains: &[String]) -> Result<(), ResolvConfError> {
        let content = render(self.listen_address, search_domains, &self.options);
        debug!("Writing {}.", self.path.display());
        fs::write(&self.path, content).map_err(|source| ResolvConfError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Renders the canonical resolver file.
pub fn render(listen_address: IpAddr, search_domains: &[String], options: &str) -> String {
    let mut content = format!("nameserver {}\n", listen_address);
    if !search_domains.is_empty() {
        content.push_str("search ");
        content.push_str(&search_domains.join(" "));
        content.push('\n');
    }
    if !options.is_empty() {
        content.push_str("options ");
        content.push_str(options);
        content.push('\n');
    }
    content
}
