//! Eligibility predicate scenarios: tri-valued outcomes.

use std::collections::HashSet;

use swapfarm::matcher::eligibility;
use swapfarm::types::AssetType;

use crate::mock_backend::{MockAccount, MockBackend, OUR_ID};

#[tokio::test]
async fn test_fully_eligible() {
    let account = MockAccount::eligible();
    let backend = MockBackend::new(false);
    assert_eq!(eligibility(&account, &backend).await, Some(true));
}

#[tokio::test]
async fn test_no_mobile_authenticator() {
    let mut account = MockAccount::eligible();
    account.mobile_authenticator = false;
    let backend = MockBackend::new(false);
    assert_eq!(eligibility(&account, &backend).await, Some(false));
}

#[tokio::test]
async fn test_matcher_preference_disabled() {
    let mut account = MockAccount::eligible();
    account.preferences.steam_trade_matcher = false;
    let backend = MockBackend::new(false);
    assert_eq!(eligibility(&account, &backend).await, Some(false));
}

#[tokio::test]
async fn test_no_accepted_matchable_types() {
    let mut account = MockAccount::eligible();
    account.matchable_types = [AssetType::BoosterPack].into_iter().collect();
    let backend = MockBackend::new(false);
    assert_eq!(eligibility(&account, &backend).await, Some(false));

    account.matchable_types = HashSet::new();
    assert_eq!(eligibility(&account, &backend).await, Some(false));
}

#[tokio::test]
async fn test_api_key_unresolved_is_network_failure() {
    let account = MockAccount::eligible();
    let backend = MockBackend::new(false);
    *backend.api_key.lock().unwrap() = (false, None);
    assert_eq!(eligibility(&account, &backend).await, None);
}

#[tokio::test]
async fn test_empty_api_key_is_ineligible() {
    let account = MockAccount::eligible();
    let backend = MockBackend::new(false);
    *backend.api_key.lock().unwrap() = (true, Some(String::new()));
    assert_eq!(eligibility(&account, &backend).await, Some(false));
}

#[tokio::test]
async fn test_private_inventory_is_ineligible() {
    let account = MockAccount::eligible();
    let backend = MockBackend::new(false);
    backend.private_profiles.lock().unwrap().insert(OUR_ID);
    assert_eq!(eligibility(&account, &backend).await, Some(false));
}

#[tokio::test]
async fn test_profile_check_failure_is_network_failure() {
    let account = MockAccount::eligible();
    let backend = MockBackend::new(false);
    *backend.profile_error.lock().unwrap() = true;
    assert_eq!(eligibility(&account, &backend).await, None);
}
