//! PayloadCodec - payload bytes と型の相互変換
//!
//! 形式は JSON。decode 失敗は `PayloadDecode`（handler の失敗として retry される）。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{SpindleError, SpindleResult};

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> SpindleResult<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| SpindleError::InvalidOption(format!("payload encode: {e}")))
    }

    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SpindleResult<T> {
        serde_json::from_slice(bytes).map_err(|e| SpindleError::PayloadDecode(e.to_string()))
    }
}
