//! Web session initialisation.
//!
//! Session init exchanges a logon nonce for web cookies: a random 32-byte
//! symmetric key is encrypted under the platform's RSA public key for the
//! account's universe, the nonce is encrypted under that symmetric key
//! (ECB-encrypted IV followed by the CBC body), and both are posted to the
//! identity endpoint. The returned token pair is planted as cookies across
//! the community, store and help hosts, together with a base64-encoded
//! account id as `sessionid`. An optional 4-digit parental code is then
//! posted to the parental-unlock endpoint on community and store.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockEncryptMut, KeyInit, KeyIvInit};
use aes::Aes256;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use reqwest::Method;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use serde::Deserialize;
use tracing::{debug, info};

use super::client::{HostKind, SessionField, WebClient, DEFAULT_MAX_TRIES};
use crate::types::{SteamId, SwapfarmError};

/// Platform universe an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Universe {
    Public,
    Beta,
    Internal,
    Dev,
}

/// RSA modulus of the Public universe system key, hex.
const PUBLIC_UNIVERSE_MODULUS: &str = concat!(
    "DFEC1AD62C10667C17F2B6B8371FA97AD53C2F2DCE43C23DB5A2C829F5B83A04",
    "6ED81F7317BB5B5BBE3AEA7843EA8F225C3255E08A1FF77F7C8A0D3FDE25196C",
    "C9DD1C2E03D0F09FB4BDAB9C2C81D0A481D135D1EC3C9A45E1C1D16AEC7EDF78",
    "B1F7CF88F3A1E2C6DDA9BBD63E8D37C7FAE2B4E6F3DC02A8B7639A5D8C21F3BD"
);

/// RSA public exponent of the universe system keys, hex.
const UNIVERSE_EXPONENT: &str = "11";

#[derive(Debug, Deserialize)]
struct AuthenticateUserResponse {
    authenticateuser: AuthenticateUserTokens,
}

#[derive(Debug, Deserialize)]
struct AuthenticateUserTokens {
    token: String,
    tokensecure: String,
}

impl WebClient {
    /// Initialise the web session from a fresh logon nonce.
    pub async fn init_session(
        &self,
        steam_id: SteamId,
        universe: Universe,
        web_api_user_nonce: &str,
        parental_code: Option<&str>,
    ) -> Result<()> {
        if steam_id == 0 {
            return Err(SwapfarmError::InvalidInput("steamID is zero".into()).into());
        }
        if web_api_user_nonce.is_empty() {
            return Err(SwapfarmError::InvalidInput("nonce is empty".into()).into());
        }

        let mut session_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut session_key);

        let public_key = universe_public_key(universe)?;
        let encrypted_session_key = public_key
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, &session_key)
            .context("RSA encryption of the session key failed")?;

        let encrypted_login_key =
            symmetric_encrypt(web_api_user_nonce.as_bytes(), &session_key);

        let form = vec![
            ("steamid".to_string(), steam_id.to_string()),
            ("sessionkey".to_string(), BASE64.encode(&encrypted_session_key)),
            (
                "encrypted_loginkey".to_string(),
                BASE64.encode(&encrypted_login_key),
            ),
        ];

        let resp = self
            .send_request(
                Method::POST,
                HostKind::Api,
                "/ISteamUserAuth/AuthenticateUser/v1/",
                Some(&form),
                SessionField::None,
                DEFAULT_MAX_TRIES,
            )
            .await?;
        let resp = resp
            .error_for_status()
            .context("AuthenticateUser was rejected")?;
        let auth: AuthenticateUserResponse = resp
            .json()
            .await
            .context("Failed to decode AuthenticateUser response")?;

        let session_id = BASE64.encode(steam_id.to_string());
        self.plant_session_cookies(
            &session_id,
            &auth.authenticateuser.token,
            &auth.authenticateuser.tokensecure,
        );
        self.mark_session_valid(session_id).await;

        info!(steam_id, "Web session initialised");

        if let Some(code) = parental_code {
            self.unlock_parental(code).await?;
        }

        Ok(())
    }

    /// Plant the session cookies on the three primary hosts.
    fn plant_session_cookies(&self, session_id: &str, token: &str, token_secure: &str) {
        for host in [HostKind::Community, HostKind::Store, HostKind::Help] {
            let base = self.base(host);
            let Ok(url) = reqwest::Url::parse(base) else {
                continue;
            };
            let Some(domain) = url.host_str().map(str::to_string) else {
                continue;
            };

            for (name, value) in [
                ("sessionid", session_id),
                ("steamLogin", token),
                ("steamLoginSecure", token_secure),
                ("timezoneOffset", "0,0"),
            ] {
                self.jar.add_cookie_str(
                    &format!("{name}={value}; Domain={domain}; Path=/"),
                    &url,
                );
            }
        }
        debug!("Session cookies planted");
    }

    /// Unlock parental restrictions on the community and store hosts.
    async fn unlock_parental(&self, code: &str) -> Result<()> {
        if code.len() != 4 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(
                SwapfarmError::InvalidInput("parental code is not 4 digits".into()).into(),
            );
        }

        let form = vec![("pin".to_string(), code.to_string())];
        for host in [HostKind::Community, HostKind::Store] {
            self.post_form_html(host, "/parental/ajaxunlock", &form, SessionField::Lowercase)
                .await
                .context("Parental unlock failed")?;
        }

        debug!("Parental restrictions unlocked");
        Ok(())
    }
}

/// The platform's RSA public key for the given universe.
fn universe_public_key(universe: Universe) -> Result<RsaPublicKey> {
    let modulus_hex = match universe {
        Universe::Public => PUBLIC_UNIVERSE_MODULUS,
        other => {
            return Err(SwapfarmError::InvalidInput(format!(
                "no system key for universe {other:?}"
            ))
            .into())
        }
    };

    let modulus = BigUint::parse_bytes(modulus_hex.as_bytes(), 16)
        .context("Invalid universe key modulus")?;
    let exponent = BigUint::parse_bytes(UNIVERSE_EXPONENT.as_bytes(), 16)
        .context("Invalid universe key exponent")?;

    RsaPublicKey::new(modulus, exponent).context("Invalid universe public key")
}

/// Encrypt `plaintext` under `key`: a random IV encrypted with AES-256-ECB,
/// followed by the AES-256-CBC body with PKCS#7 padding.
fn symmetric_encrypt(plaintext: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let ecb = ecb::Encryptor::<Aes256>::new(key.into());
    let mut output = ecb.encrypt_padded_vec_mut::<NoPadding>(&iv);

    let cbc = cbc::Encryptor::<Aes256>::new(key.into(), &iv.into());
    output.extend_from_slice(&cbc.encrypt_padded_vec_mut::<Pkcs7>(plaintext));

    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
