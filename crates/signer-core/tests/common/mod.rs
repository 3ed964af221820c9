//! Shared fixtures for the integration tests: software devices backed by a
//! BIP39 seed and an instrumented factory that counts sessions.

#![allow(dead_code, unreachable_pub)]

// Silence unused crate dependency warnings for test binaries
use alloy_rlp as _;
use hmac as _;
use parking_lot as _;
use serde as _;
use serde_json as _;
use sha2 as _;
use ::test_case as _;
use thiserror as _;
use tracing as _;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::{B256, keccak256};
use alloy_rlp::{Decodable, Header};
use hmac::{Hmac, Mac};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{NonZeroScalar, PublicKey, SecretKey};
use parking_lot::Mutex;
use sha2::Sha512;
use tracing_subscriber::EnvFilter;

use ledger_evm_signer_core::derivation::HARDENED_OFFSET;
use ledger_evm_signer_core::{
    Address, AddressResponse, DerivationPath, DeviceClient, DeviceClientFactory, Error,
    MessageSignatureResponse, Result, TxSignatureResponse,
};

/// The mnemonic every Hardhat and Foundry dev node starts from.
pub const HARDHAT_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Accounts at `m/44'/60'/0'/0/{0,1,2}` of [`HARDHAT_MNEMONIC`].
pub const HARDHAT_ACCOUNTS: [&str; 3] = [
    "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
    "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
    "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
];

type HmacSha512 = Hmac<Sha512>;

/// Installs a test log subscriber once. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns the 64-byte seed of [`HARDHAT_MNEMONIC`].
pub fn hardhat_seed() -> [u8; 64] {
    bip39::Mnemonic::parse(HARDHAT_MNEMONIC)
        .expect("valid mnemonic")
        .to_seed("")
}

/// Derives the private key and chain code at `path` from `seed`.
pub fn derive_secret(seed: &[u8], path: &str) -> (SecretKey, [u8; 32]) {
    let path: DerivationPath = path.parse().expect("valid path");

    let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed").unwrap();
    mac.update(seed);
    let master = mac.finalize().into_bytes();
    let mut key = SecretKey::from_slice(&master[..32]).unwrap();
    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&master[32..]);

    for &index in path.components() {
        let mut mac = HmacSha512::new_from_slice(&chain_code).unwrap();
        if index >= HARDENED_OFFSET {
            mac.update(&[0]);
            mac.update(&key.to_bytes());
        } else {
            mac.update(key.public_key().to_encoded_point(true).as_bytes());
        }
        mac.update(&index.to_be_bytes());
        let i = mac.finalize().into_bytes();

        let tweak = NonZeroScalar::try_from(&i[..32]).unwrap();
        let child: Option<NonZeroScalar> =
            NonZeroScalar::new(*tweak + *key.to_nonzero_scalar()).into();
        key = SecretKey::from(child.unwrap());
        chain_code.copy_from_slice(&i[32..]);
    }

    (key, chain_code)
}

/// How a [`SeedDevice`] answers transaction signing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxFirmware {
    /// Reads the chain id from the payload and returns an EIP-155 `v`.
    #[default]
    ChainIdAware,
    /// Ignores the payload's chain id and signs for this one instead.
    FixedChain(u64),
    /// Returns a pre-EIP-155 `v` of 27 or 28.
    Legacy,
}

/// A software device deriving real keys from a seed.
#[derive(Clone)]
pub struct SeedDevice {
    seed: Vec<u8>,
    firmware: TxFirmware,
}

impl SeedDevice {
    pub fn new(seed: &[u8]) -> Self {
        Self {
            seed: seed.to_vec(),
            firmware: TxFirmware::default(),
        }
    }

    pub fn hardhat() -> Self {
        Self::new(&hardhat_seed())
    }

    pub fn with_firmware(mut self, firmware: TxFirmware) -> Self {
        self.firmware = firmware;
        self
    }

    fn signing_key(&self, path: &str) -> SigningKey {
        SigningKey::from(&derive_secret(&self.seed, path).0)
    }
}

impl DeviceClient for SeedDevice {
    fn get_address(
        &mut self,
        path: &str,
        _ask_for_on_device_confirmation: bool,
        want_chain_code: bool,
    ) -> Result<AddressResponse> {
        let (key, chain_code) = derive_secret(&self.seed, path);
        let public_key = key.public_key();
        Ok(AddressResponse {
            address: Address::from_public_key(&public_key).to_checksum_hex(),
            public_key: hex::encode(public_key.to_encoded_point(true).as_bytes()),
            chain_code: want_chain_code.then(|| hex::encode(chain_code)),
        })
    }

    fn sign_transaction(&mut self, path: &str, raw_tx_hex: &str) -> Result<TxSignatureResponse> {
        let payload = hex::decode(raw_tx_hex)?;
        let (r, s, recovery_id) = sign_hash(&self.signing_key(path), &keccak256(&payload));

        let v = if payload.first() == Some(&0x02) {
            u64::from(recovery_id)
        } else {
            match self.firmware {
                TxFirmware::ChainIdAware => {
                    let chain_id = be_u64(&rlp_items(&payload)[6]);
                    chain_id * 2 + 35 + u64::from(recovery_id)
                }
                TxFirmware::FixedChain(chain_id) => chain_id * 2 + 35 + u64::from(recovery_id),
                TxFirmware::Legacy => 27 + u64::from(recovery_id),
            }
        };

        Ok(TxSignatureResponse {
            r,
            s,
            v: format!("{v:x}"),
        })
    }

    fn sign_personal_message(
        &mut self,
        path: &str,
        message_hex: &str,
    ) -> Result<MessageSignatureResponse> {
        let message = hex::decode(message_hex)?;
        let (r, s, recovery_id) =
            sign_hash(&self.signing_key(path), &personal_message_hash(&message));
        Ok(MessageSignatureResponse {
            r,
            s,
            v: 27 + u64::from(recovery_id),
        })
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A device with real keys but canned signing answers.
pub struct ScriptedDevice {
    keys: SeedDevice,
    tx_response: Option<TxSignatureResponse>,
    message_response: Option<MessageSignatureResponse>,
    failure: Option<fn() -> Error>,
}

impl ScriptedDevice {
    pub fn new(keys: SeedDevice) -> Self {
        Self {
            keys,
            tx_response: None,
            message_response: None,
            failure: None,
        }
    }

    pub fn with_tx_response(mut self, response: TxSignatureResponse) -> Self {
        self.tx_response = Some(response);
        self
    }

    pub fn with_message_response(mut self, response: MessageSignatureResponse) -> Self {
        self.message_response = Some(response);
        self
    }

    /// Makes every signing request fail with the error `failure` builds.
    pub fn failing_with(mut self, failure: fn() -> Error) -> Self {
        self.failure = Some(failure);
        self
    }
}

impl DeviceClient for ScriptedDevice {
    fn get_address(
        &mut self,
        path: &str,
        ask_for_on_device_confirmation: bool,
        want_chain_code: bool,
    ) -> Result<AddressResponse> {
        self.keys
            .get_address(path, ask_for_on_device_confirmation, want_chain_code)
    }

    fn sign_transaction(&mut self, _path: &str, _raw_tx_hex: &str) -> Result<TxSignatureResponse> {
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        self.tx_response.clone().ok_or(Error::UserRejected)
    }

    fn sign_personal_message(
        &mut self,
        _path: &str,
        _message_hex: &str,
    ) -> Result<MessageSignatureResponse> {
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        self.message_response.clone().ok_or(Error::UserRejected)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Session counters shared between an instrumented factory and a test.
#[derive(Debug, Default)]
pub struct DeviceStats {
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl DeviceStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Returns the device calls made so far, as `method path`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, method: &str, path: &str) {
        self.calls.lock().push(format!("{method} {path}"));
    }
}

struct CountingClient {
    inner: Box<dyn DeviceClient>,
    stats: Arc<DeviceStats>,
    delay: Duration,
    closed: bool,
}

impl CountingClient {
    fn enter(&self, method: &str, path: &str) {
        self.stats.record(method, path);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

impl DeviceClient for CountingClient {
    fn get_address(
        &mut self,
        path: &str,
        ask_for_on_device_confirmation: bool,
        want_chain_code: bool,
    ) -> Result<AddressResponse> {
        self.enter("get_address", path);
        self.inner
            .get_address(path, ask_for_on_device_confirmation, want_chain_code)
    }

    fn sign_transaction(&mut self, path: &str, raw_tx_hex: &str) -> Result<TxSignatureResponse> {
        self.enter("sign_transaction", path);
        self.inner.sign_transaction(path, raw_tx_hex)
    }

    fn sign_personal_message(
        &mut self,
        path: &str,
        message_hex: &str,
    ) -> Result<MessageSignatureResponse> {
        self.enter("sign_personal_message", path);
        self.inner.sign_personal_message(path, message_hex)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stats.open_now.fetch_sub(1, Ordering::SeqCst);
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.close()
    }
}

/// Wraps every client `make` builds so that sessions are counted.
pub fn instrumented<D, F>(make: F) -> (impl DeviceClientFactory, Arc<DeviceStats>)
where
    D: DeviceClient + 'static,
    F: Fn() -> D + Send + Sync + 'static,
{
    instrumented_with_delay(make, Duration::ZERO)
}

/// Like [`instrumented`], with every device call taking at least `delay`.
pub fn instrumented_with_delay<D, F>(
    make: F,
    delay: Duration,
) -> (impl DeviceClientFactory, Arc<DeviceStats>)
where
    D: DeviceClient + 'static,
    F: Fn() -> D + Send + Sync + 'static,
{
    let stats = Arc::new(DeviceStats::default());
    let factory_stats = Arc::clone(&stats);

    let factory = move || -> Result<Box<dyn DeviceClient>> {
        factory_stats.opens.fetch_add(1, Ordering::SeqCst);
        let now = factory_stats.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        factory_stats.max_open.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(CountingClient {
            inner: Box::new(make()),
            stats: Arc::clone(&factory_stats),
            delay,
            closed: false,
        }))
    };

    (factory, stats)
}

/// Signs a 32-byte hash, returning hex `r`, hex `s` and the recovery id.
fn sign_hash(key: &SigningKey, hash: &B256) -> (String, String, u8) {
    let (signature, recovery_id) = key.sign_prehash_recoverable(hash.as_slice()).unwrap();
    let bytes = signature.to_bytes();
    (
        hex::encode(&bytes[..32]),
        hex::encode(&bytes[32..]),
        recovery_id.to_byte(),
    )
}

/// The EIP-191 hash a device signs for a personal message.
pub fn personal_message_hash(message: &[u8]) -> B256 {
    let mut preimage = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    preimage.extend_from_slice(message);
    keccak256(preimage)
}

/// Splits an RLP list into the payloads of its items.
pub fn rlp_items(encoded: &[u8]) -> Vec<Vec<u8>> {
    let mut buf = encoded;
    let header = Header::decode(&mut buf).unwrap();
    assert!(header.list, "expected an RLP list");

    let mut body = &buf[..header.payload_length];
    let mut items = Vec::new();
    while !body.is_empty() {
        let item = Header::decode(&mut body).unwrap();
        items.push(body[..item.payload_length].to_vec());
        body = &body[item.payload_length..];
    }
    items
}

/// Decodes a big-endian unsigned integer of at most eight bytes.
pub fn be_u64(bytes: &[u8]) -> u64 {
    assert!(bytes.len() <= 8);
    bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b))
}

/// Recovers the signing address from a prehash and raw `r`, `s`.
pub fn recover_address(prehash: &B256, r: &[u8], s: &[u8], recovery_id: u8) -> Address {
    let mut rs = [0u8; 64];
    rs[32 - r.len()..32].copy_from_slice(r);
    rs[64 - s.len()..].copy_from_slice(s);

    let signature = EcdsaSignature::from_slice(&rs).unwrap();
    let recovery_id = RecoveryId::from_byte(recovery_id).unwrap();
    let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &signature, recovery_id)
        .unwrap();
    Address::from_public_key(&PublicKey::from(&key))
}

/// Decodes a `0x`-prefixed hex string.
pub fn unhex(value: &str) -> Vec<u8> {
    hex::decode(value.trim_start_matches("0x")).unwrap()
}

/// Decodes one RLP-encoded `u64`.
pub fn decode_u64(mut encoded: &[u8]) -> u64 {
    u64::decode(&mut encoded).unwrap()
}
