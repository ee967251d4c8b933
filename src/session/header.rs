//! Session header
//!
//! A session is identified by `(application, service, start height)`; its id
//! also binds the hash of the start block so ids cannot be precomputed.

use serde::{Deserialize, Serialize};

use crate::consensus::{session_end_height, session_start_height, SharedParams};
use crate::crypto::{sha256, Hash};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHeader {
    pub application_address: String,
    pub service_id: String,
    pub session_id: String,
    pub session_start_block_height: u64,
    pub session_end_block_height: u64,
}

impl SessionHeader {
    /// Header of the session containing `height`.
    ///
    /// `start_block_hash` must be the hash of the session's start block.
    pub fn new(
        params: &SharedParams,
        application_address: impl Into<String>,
        service_id: impl Into<String>,
        height: u64,
        start_block_hash: &Hash,
    ) -> Self {
        let application_address = application_address.into();
        let service_id = service_id.into();
        let start = session_start_height(params, height);
        Self {
            session_id: session_id(&application_address, &service_id, start, start_block_hash),
            application_address,
            service_id,
            session_start_block_height: start,
            session_end_block_height: session_end_height(params, height),
        }
    }
}

/// `hex(sha256(app ‖ service ‖ start_height_be ‖ start_block_hash))`
pub fn session_id(
    application_address: &str,
    service_id: &str,
    session_start_height: u64,
    start_block_hash: &Hash,
) -> String {
    sha256(&[
        application_address.as_bytes(),
        service_id.as_bytes(),
        &session_start_height.to_be_bytes(),
        start_block_hash.as_bytes(),
    ])
    .to_hex()
}
