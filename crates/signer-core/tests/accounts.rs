//! Account discovery against a seed-backed device.

mod common;

use common::{HARDHAT_ACCOUNTS, SeedDevice, init_tracing, instrumented};
use ledger_evm_signer_core::derivation::full_path;
use ledger_evm_signer_core::hdkey::child_key;
use ledger_evm_signer_core::{Address, Error, SigningOrchestrator, SubproviderConfig};
use test_case::test_case;

fn hardhat_signer(base_path: &str) -> (SigningOrchestrator, std::sync::Arc<common::DeviceStats>) {
    init_tracing();
    let (factory, stats) = instrumented(SeedDevice::hardhat);
    let mut config = SubproviderConfig::new(31337);
    config.base_derivation_path = base_path.to_string();
    (SigningOrchestrator::new(config, factory).unwrap(), stats)
}

#[test]
fn lists_hardhat_accounts() {
    let (signer, stats) = hardhat_signer("44'/60'/0'/0");

    let accounts = signer.accounts(3).unwrap();
    let expected: Vec<Address> = HARDHAT_ACCOUNTS
        .iter()
        .map(|a| Address::parse(a).unwrap())
        .collect();
    assert_eq!(accounts, expected);

    // One round trip, for the master key only.
    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 1);
    assert_eq!(stats.calls(), vec!["get_address m/44'/60'/0'/0"]);
}

#[test]
fn default_base_path_lists_change_level_keys() {
    let (signer, _) = hardhat_signer("44'/60'/0'");
    let keys = signer.derived_accounts(1).unwrap();
    assert_eq!(keys[0].derivation_path, "m/44'/60'/0'/0");
    assert!(!keys[0].address.matches_hex(HARDHAT_ACCOUNTS[0]));

    // The Hardhat accounts sit one level further down.
    let first = child_key(&keys[0], 0).unwrap();
    assert!(first.address.matches_hex(HARDHAT_ACCOUNTS[0]));
}

#[test]
fn derived_accounts_carry_full_paths() {
    let (signer, _) = hardhat_signer("44'/60'/0'/0");
    let keys = signer.derived_accounts(3).unwrap();

    for (index, key) in (0u32..).zip(&keys) {
        assert_eq!(key.derivation_path, full_path("44'/60'/0'/0", Some(index)));
        assert_eq!(key.base_derivation_path, "44'/60'/0'/0");
        assert_eq!(key.address, key.extended_public_key.address());
    }
}

#[test_case(0 ; "none")]
#[test_case(1 ; "one")]
#[test_case(25 ; "many")]
fn one_round_trip_regardless_of_count(count: u32) {
    let (signer, stats) = hardhat_signer("44'/60'/0'/0");
    assert_eq!(signer.accounts(count).unwrap().len(), count as usize);
    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.open_now(), 0);
}

#[test]
fn listing_is_prefix_consistent() {
    let (signer, _) = hardhat_signer("44'/60'/0'/0");
    let short = signer.accounts(4).unwrap();
    let long = signer.accounts(5).unwrap();
    assert_eq!(&long[..4], &short[..]);
}

#[test]
fn set_path_moves_discovery() {
    let (signer, stats) = hardhat_signer("44'/60'/0'");
    signer.set_path("44'/60'/0'/0").unwrap();

    let accounts = signer.accounts(2).unwrap();
    assert!(accounts[1].matches_hex(HARDHAT_ACCOUNTS[1]));
    assert_eq!(stats.calls(), vec!["get_address m/44'/60'/0'/0"]);
}

#[test]
fn unknown_address_is_not_found_within_limit() {
    init_tracing();
    let (factory, stats) = instrumented(SeedDevice::hardhat);
    let mut config = SubproviderConfig::new(1);
    config.base_derivation_path = "44'/60'/0'/0".to_string();
    config.account_fetching.address_search_limit = 2;
    let signer = SigningOrchestrator::new(config, factory).unwrap();

    // Index 2 sits exactly at the limit.
    let result = signer.sign_personal_message("0xdeadbeef", HARDHAT_ACCOUNTS[2]);
    assert!(matches!(result, Err(Error::AddressNotFound(a)) if a == HARDHAT_ACCOUNTS[2]));

    // Resolution failed after the master key fetch; no signing session.
    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.open_now(), 0);
}
