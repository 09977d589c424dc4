// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The shared key-value store every node talks to.
//!
//! Only the primitives the registry needs are exposed: string hashes, key
//! deletion and pattern scans. Each call is one round trip; nothing here is
//! transactional across calls.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod resp;

pub use memory::MemoryStore;
pub use resp::{RespCodec, RespStore, RespValue, StoreConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("store protocol error: {0}")]
    Protocol(String),
    #[error("store replied with error: {0}")]
    Server(String),
    #[error("invalid store URL: {0}")]
    InvalidUrl(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a field. Removing an absent field is not an error.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_length(&self, key: &str) -> Result<usize, StoreError>;

    /// Glob-style key scan (`*` and `?`).
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
