// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A JSON-RPC provider for tests, keyed by method and exact params.
//!
//! Responses added with `add_response` persist and answer every matching
//! request; `add_response_once` responses are consumed by the first
//! match, which lets a test force a later request to fail.

use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, ProviderError, RpcError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MockError {
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error("no mock response set for {0} with params {1}")]
    EmptyResponses(String, String),
}

impl RpcError for MockError {
    fn as_error_response(&self) -> Option<&ethers::providers::JsonRpcError> {
        None
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        match self {
            MockError::SerdeJson(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MockError> for ProviderError {
    fn from(e: MockError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(e))
    }
}

#[derive(Clone, Debug, Default)]
pub struct EthMockProvider {
    responses: Arc<Mutex<HashMap<(String, String), Value>>>,
    once_responses: Arc<Mutex<HashMap<(String, String), VecDeque<Value>>>>,
    method_responses: Arc<Mutex<HashMap<String, Value>>>,
}

impl EthMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persistent response for an exact (method, params) pair
    pub fn add_response<T, K, R>(&self, method: &str, params: T, response: K) -> Result<(), MockError>
    where
        T: Serialize + Send + Sync,
        K: Borrow<R>,
        R: Serialize,
    {
        let params = serde_json::to_string(&serde_json::to_value(params)?)?;
        let value = serde_json::to_value(response.borrow())?;
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), params), value);
        Ok(())
    }

    /// Response consumed by the first matching request
    pub fn add_response_once<T, K, R>(
        &self,
        method: &str,
        params: T,
        response: K,
    ) -> Result<(), MockError>
    where
        T: Serialize + Send + Sync,
        K: Borrow<R>,
        R: Serialize,
    {
        let params = serde_json::to_string(&serde_json::to_value(params)?)?;
        let value = serde_json::to_value(response.borrow())?;
        self.once_responses
            .lock()
            .unwrap()
            .entry((method.to_string(), params))
            .or_default()
            .push_back(value);
        Ok(())
    }

    /// Persistent response keyed by raw JSON values, for params that are
    /// simpler to build than to type
    pub fn add_response_value(
        &self,
        method: &str,
        params: Value,
        response: Value,
    ) -> Result<(), MockError> {
        let params = serde_json::to_string(&params)?;
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), params), response);
        Ok(())
    }

    /// Fallback response for a method regardless of params
    pub fn add_method_response(&self, method: &str, response: Value) -> Result<(), MockError> {
        self.method_responses
            .lock()
            .unwrap()
            .insert(method.to_string(), response);
        Ok(())
    }

    fn lookup(&self, method: &str, params: &str) -> Option<Value> {
        let key = (method.to_string(), params.to_string());
        {
            let mut once = self.once_responses.lock().unwrap();
            if let Some(queue) = once.get_mut(&key) {
                if let Some(value) = queue.pop_front() {
                    return Some(value);
                }
            }
        }
        if let Some(value) = self.responses.lock().unwrap().get(&key) {
            return Some(value.clone());
        }
        self.method_responses.lock().unwrap().get(method).cloned()
    }
}

#[async_trait]
impl JsonRpcClient for EthMockProvider {
    type Error = MockError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, MockError> {
        let params_key = serde_json::to_string(&serde_json::to_value(&params)?)?;
        let value = self.lookup(method, &params_key).ok_or_else(|| {
            MockError::EmptyResponses(method.to_string(), params_key.clone())
        })?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;

    #[tokio::test]
    async fn test_keyed_response_round_trip() {
        let mock = EthMockProvider::new();
        mock.add_response("eth_blockNumber", (), U64::from(7u64))
            .unwrap();
        let first: U64 = mock.request("eth_blockNumber", ()).await.unwrap();
        let second: U64 = mock.request("eth_blockNumber", ()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_once_response_is_consumed() {
        let mock = EthMockProvider::new();
        mock.add_response_once("eth_blockNumber", (), U64::from(7u64))
            .unwrap();
        let _: U64 = mock.request("eth_blockNumber", ()).await.unwrap();
        let err = mock
            .request::<_, U64>("eth_blockNumber", ())
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::EmptyResponses(..)));
    }

    #[tokio::test]
    async fn test_params_distinguish_responses() {
        let mock = EthMockProvider::new();
        mock.add_response("m", [1u64], U64::from(1u64)).unwrap();
        mock.add_response("m", [2u64], U64::from(2u64)).unwrap();
        let one: U64 = mock.request("m", [1u64]).await.unwrap();
        let two: U64 = mock.request("m", [2u64]).await.unwrap();
        assert_eq!(one, U64::from(1u64));
        assert_eq!(two, U64::from(2u64));
    }

    #[tokio::test]
    async fn test_method_fallback() {
        let mock = EthMockProvider::new();
        mock.add_method_response("eth_getLogs", serde_json::json!([]))
            .unwrap();
        let logs: Vec<ethers::types::Log> = mock
            .request("eth_getLogs", [serde_json::json!({"address": "0x0"})])
            .await
            .unwrap();
        assert!(logs.is_empty());
    }
}
