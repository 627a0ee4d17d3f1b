//! Message Codec Module
//!
//! The executor never looks inside payloads. A `MessageCodec` turns a typed
//! call into the wire bytes for its destination actor and decodes the reply
//! payload into the result type the call declares.
//!
//! # Provided Codecs
//! - `RawCodec`: calls are ready-made `Request`s, results are the raw reply bytes
//! - `JsonCodec`: calls name a method plus JSON arguments, results are JSON values

use crate::{ActorId, CodecError, DEFAULT_GAS_LIMIT, Request};
use ethers::types::{Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Encoding and decoding for one family of contract calls
pub trait MessageCodec: Send + Sync {
    /// Typed call the caller submits
    type Call: Send + Sync;
    /// Decoded result of a successful reply
    type Output: fmt::Debug + Send + 'static;

    /// Actor the call is addressed to
    fn destination(&self, call: &Self::Call) -> ActorId;

    /// Serialize the call into its wire payload
    fn encode(&self, call: &Self::Call) -> Result<Bytes, CodecError>;

    /// Decode the payload of a successful reply to `call`
    fn decode(&self, call: &Self::Call, payload: &[u8]) -> Result<Self::Output, CodecError>;

    /// Value transferred along with the call
    fn value(&self, _call: &Self::Call) -> U256 {
        U256::zero()
    }

    fn gas_limit(&self, _call: &Self::Call) -> u64 {
        DEFAULT_GAS_LIMIT
    }

    /// Build the wire request for `call`
    fn request(&self, call: &Self::Call) -> Result<Request, CodecError> {
        Ok(Request {
            destination: self.destination(call),
            payload: self.encode(call)?,
            value: self.value(call),
            gas_limit: self.gas_limit(call),
        })
    }
}

/// Pass-through codec for pre-encoded requests
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    type Call = Request;
    type Output = Bytes;

    fn destination(&self, call: &Request) -> ActorId {
        call.destination
    }

    fn encode(&self, call: &Request) -> Result<Bytes, CodecError> {
        Ok(call.payload.clone())
    }

    fn decode(&self, _call: &Request, payload: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(payload.to_vec()))
    }

    fn value(&self, call: &Request) -> U256 {
        call.value
    }

    fn gas_limit(&self, call: &Request) -> u64 {
        call.gas_limit
    }
}

/// Call to a JSON-speaking actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonCall {
    pub destination: ActorId,
    pub method: String,
    pub args: Value,
    #[serde(default)]
    pub value: U256,
}

impl JsonCall {
    pub fn new(destination: ActorId, method: impl Into<String>, args: Value) -> Self {
        Self {
            destination,
            method: method.into(),
            args,
            value: U256::zero(),
        }
    }
}

/// Payload layout `JsonCodec` puts on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonEnvelope {
    pub method: String,
    pub args: Value,
}

/// Codec for actors that exchange JSON documents
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    type Call = JsonCall;
    type Output = Value;

    fn destination(&self, call: &JsonCall) -> ActorId {
        call.destination
    }

    fn encode(&self, call: &JsonCall) -> Result<Bytes, CodecError> {
        let envelope = JsonEnvelope {
            method: call.method.clone(),
            args: call.args.clone(),
        };
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    fn decode(&self, _call: &JsonCall, payload: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }

    fn value(&self, call: &JsonCall) -> U256 {
        call.value
    }
}
