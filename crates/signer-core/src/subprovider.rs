//! JSON-RPC dispatch in front of the signer.
//!
//! [`SubproviderAdapter`] sits in a chain of request handlers. Signing and
//! account methods are answered from the device; everything else goes to the
//! [`NextInterceptor`] untouched. The adapter also uses the next interceptor
//! to fill in missing transaction fields and to submit signed transactions.

use serde_json::{Value, json};
use tracing::debug;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::signer::SigningOrchestrator;
use crate::transaction::{TxParams, parse_quantity};

/// The next handler in the request chain.
pub trait NextInterceptor {
    /// Handles `request` and returns its `result`.
    ///
    /// # Errors
    ///
    /// Implementations report failures as [`Error::Upstream`].
    fn forward(&self, request: JsonRpcRequest) -> Result<Value>;
}

impl<F> NextInterceptor for F
where
    F: Fn(JsonRpcRequest) -> Result<Value>,
{
    fn forward(&self, request: JsonRpcRequest) -> Result<Value> {
        self(request)
    }
}

/// The JSON-RPC methods answered by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptedMethod {
    /// `eth_accounts`
    Accounts,
    /// `eth_coinbase`
    Coinbase,
    /// `eth_sendTransaction`
    SendTransaction,
    /// `eth_signTransaction`
    SignTransaction,
    /// `eth_sign`, params `[address, data]`
    Sign,
    /// `personal_sign`, params `[data, address]`
    PersonalSign,
    /// `eth_signTypedData`, params `[typedData, address]`
    SignTypedData,
    /// `eth_signTypedData_v3` and `_v4`, params `[address, typedData]`
    SignTypedDataV3,
}

impl InterceptedMethod {
    /// Looks up an intercepted method by name.
    #[must_use]
    pub fn from_name(method: &str) -> Option<Self> {
        Some(match method {
            "eth_accounts" => Self::Accounts,
            "eth_coinbase" => Self::Coinbase,
            "eth_sendTransaction" => Self::SendTransaction,
            "eth_signTransaction" => Self::SignTransaction,
            "eth_sign" => Self::Sign,
            "personal_sign" => Self::PersonalSign,
            "eth_signTypedData" => Self::SignTypedData,
            "eth_signTypedData_v3" | "eth_signTypedData_v4" => Self::SignTypedDataV3,
            _ => return None,
        })
    }
}

/// Routes JSON-RPC requests to a [`SigningOrchestrator`].
#[derive(Debug)]
pub struct SubproviderAdapter<N> {
    signer: SigningOrchestrator,
    next: N,
}

impl<N: NextInterceptor> SubproviderAdapter<N> {
    /// Creates an adapter forwarding unhandled requests to `next`.
    #[must_use]
    pub const fn new(signer: SigningOrchestrator, next: N) -> Self {
        Self { signer, next }
    }

    /// Returns the signer.
    #[must_use]
    pub const fn signer(&self) -> &SigningOrchestrator {
        &self.signer
    }

    /// Handles `request` and wraps the outcome in a response envelope.
    pub fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.handle(request) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::from(&e)),
        }
    }

    /// Handles `request` and returns its `result`.
    ///
    /// # Errors
    ///
    /// Whatever the signer or the next interceptor raises.
    pub fn handle(&self, request: JsonRpcRequest) -> Result<Value> {
        let Some(method) = InterceptedMethod::from_name(&request.method) else {
            return self.next.forward(request);
        };
        debug!(method = %request.method, "intercepted request");

        match method {
            InterceptedMethod::Accounts => {
                let count = self.signer.account_fetching().num_addresses_to_return;
                let accounts = self.signer.accounts(count)?;
                Ok(json!(accounts.iter().map(Address::to_hex).collect::<Vec<_>>()))
            }
            InterceptedMethod::Coinbase => {
                let accounts = self.signer.accounts(1)?;
                Ok(accounts.first().map_or(Value::Null, |a| json!(a.to_hex())))
            }
            InterceptedMethod::SendTransaction => {
                let params = self.tx_params(&request)?;
                let raw = self.signer.sign_transaction(&params)?;
                self.next
                    .forward(JsonRpcRequest::new("eth_sendRawTransaction", vec![json!(raw)]))
            }
            InterceptedMethod::SignTransaction => {
                let params = self.tx_params(&request)?;
                let raw = self.signer.sign_transaction(&params)?;
                Ok(json!({ "raw": raw, "tx": params }))
            }
            InterceptedMethod::Sign | InterceptedMethod::PersonalSign => {
                let (data_index, address_index) = if method == InterceptedMethod::Sign {
                    (1, 0)
                } else {
                    (0, 1)
                };
                let data = request
                    .param(data_index)
                    .and_then(Value::as_str)
                    .ok_or(Error::DataMissingForSignPersonalMessage)?;
                let address = string_param(&request, address_index, "address")?;
                Ok(json!(self.signer.sign_personal_message(data, address)?))
            }
            InterceptedMethod::SignTypedData | InterceptedMethod::SignTypedDataV3 => {
                let (data_index, address_index) = if method == InterceptedMethod::SignTypedData {
                    (0, 1)
                } else {
                    (1, 0)
                };
                let address = string_param(&request, address_index, "address")?;
                let typed_data = request.param(data_index).unwrap_or(&Value::Null);
                self.signer
                    .sign_typed_data(address, typed_data)
                    .map(Value::from)
                    .map_err(|_| Error::MethodNotSupported(request.method.clone()))
            }
        }
    }

    /// Extracts, validates and completes the transaction in `params[0]`.
    fn tx_params(&self, request: &JsonRpcRequest) -> Result<TxParams> {
        let value = request.param(0).ok_or_else(|| Error::InvalidParams {
            method: request.method.clone(),
            reason: "missing transaction object".to_string(),
        })?;
        let params: TxParams =
            serde_json::from_value(value.clone()).map_err(|e| Error::InvalidParams {
                method: request.method.clone(),
                reason: e.to_string(),
            })?;

        if !params.from.as_deref().is_some_and(Address::is_valid) {
            return Err(Error::FromAddressMissingOrInvalid);
        }
        params.validate()?;

        self.populate_missing_tx_params(params)
    }

    /// Asks the next interceptor for any of `gasPrice`, `nonce` and `gas`
    /// the caller left out.
    fn populate_missing_tx_params(&self, mut params: TxParams) -> Result<TxParams> {
        if params.gas_price.is_none() && !params.is_fee_market()? {
            params.gas_price = Some(self.quantity("eth_gasPrice", vec![])?);
        }
        if params.nonce.is_none() {
            let from = params.from.clone().unwrap_or_default();
            params.nonce = Some(self.quantity(
                "eth_getTransactionCount",
                vec![json!(from), json!("pending")],
            )?);
        }
        if params.gas.is_none() {
            let tx = serde_json::to_value(&params)?;
            params.gas = Some(self.quantity("eth_estimateGas", vec![tx])?);
        }
        Ok(params)
    }

    /// Forwards `method` and expects a hex quantity back.
    fn quantity(&self, method: &str, params: Vec<Value>) -> Result<String> {
        let result = self.next.forward(JsonRpcRequest::new(method, params))?;
        let quantity = result
            .as_str()
            .filter(|q| parse_quantity(method, q).is_ok())
            .ok_or_else(|| Error::Upstream {
                method: method.to_string(),
                message: format!("expected a hex quantity, got {result}"),
            })?;
        debug!(method, quantity, "populated transaction field");
        Ok(quantity.to_string())
    }
}

/// Returns `params[index]` as a string.
fn string_param<'a>(request: &'a JsonRpcRequest, index: usize, name: &str) -> Result<&'a str> {
    request
        .param(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidParams {
            method: request.method.clone(),
            reason: format!("missing {name} at position {index}"),
        })
}
