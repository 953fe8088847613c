//! Verification of platform-signed purchase tokens.
//!
//! Tokens arrive as ES256 JWS with the signing certificate chain inline in
//! the `x5c` header. Verification checks the leaf validity window, every
//! link of the chain, and that the chain terminates in a pinned root, before
//! the payload is trusted. Failures surface to clients as a single generic
//! message; the detail only reaches the logs.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use x509_parser::prelude::*;

use crate::config::SubscriptionConfig;
use crate::error::{Error, ErrorDetails};
use crate::store::StoreClient;
use crate::subscription::notifications::{status_change, NotificationPayload};
use crate::subscription::{
    subscription_key, transaction_index_key, SubscriptionRecord, SubscriptionStatus,
};

pub struct SubscriptionVerifier {
    store: StoreClient,
    environment: String,
    root_fingerprints: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize)]
pub struct VerifiedSubscription {
    pub status: SubscriptionStatus,
    pub expires_date: Option<DateTime<Utc>>,
}

/// Claims of a signed transaction token. Dates are millisecond epochs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub original_transaction_id: String,
    pub product_id: String,
    #[serde(default)]
    pub purchase_date: Option<i64>,
    #[serde(default)]
    pub expires_date: Option<i64>,
    #[serde(default)]
    pub revocation_date: Option<i64>,
    #[serde(default)]
    pub environment: Option<String>,
}

impl SubscriptionVerifier {
    pub fn new(store: StoreClient, config: &SubscriptionConfig) -> Result<Self, Error> {
        let root_fingerprints = config
            .root_fingerprints
            .iter()
            .map(|fp| {
                hex::decode(fp).map_err(|e| {
                    Error::new(ErrorDetails::Config {
                        message: format!("Invalid root fingerprint `{fp}`: {e}"),
                    })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if root_fingerprints.is_empty() {
            warn!(
                "No trusted root fingerprints configured; all signed transactions will be rejected"
            );
        }
        Ok(Self {
            store,
            environment: config.environment.clone(),
            root_fingerprints,
        })
    }

    /// Verifies the token and persists the derived state via merge.
    pub async fn verify_and_store(
        &self,
        device_id: &str,
        signed_token: &str,
    ) -> Result<VerifiedSubscription, Error> {
        let payload: TransactionPayload = self.decode_verified(signed_token)?;

        if let Some(environment) = &payload.environment {
            if !environment.eq_ignore_ascii_case(&self.environment) {
                return Err(Error::new(ErrorDetails::SignatureVerification {
                    message: format!(
                        "Token issued for environment `{environment}`, expected `{}`",
                        self.environment
                    ),
                }));
            }
        }

        let status = derive_status(&payload, Utc::now());
        let expires_date = payload.expires_date.and_then(DateTime::from_timestamp_millis);
        let purchase_date = payload
            .purchase_date
            .and_then(DateTime::from_timestamp_millis);

        self.store
            .update_json_with_retry(
                &subscription_key(device_id),
                |current: Option<SubscriptionRecord>| {
                    merged_record(
                        current,
                        device_id,
                        &payload,
                        status,
                        expires_date,
                        purchase_date,
                    )
                },
            )
            .await?;
        // Webhook events carry no device id, so keep the reverse index fresh
        self.store
            .put_raw(
                &transaction_index_key(&payload.original_transaction_id),
                device_id,
            )
            .await?;

        Ok(VerifiedSubscription {
            status,
            expires_date,
        })
    }

    /// Webhook path: no device id is available, so the record is found via
    /// the `original_transaction_id` index. A missing record is logged and
    /// dropped, never an error (the platform retries non-2xx responses).
    pub async fn update_status_by_original_transaction_id(
        &self,
        original_transaction_id: &str,
        status: Option<SubscriptionStatus>,
        expires_date: Option<DateTime<Utc>>,
        auto_renew_enabled: Option<bool>,
    ) -> Result<(), Error> {
        let device_id = match self
            .store
            .get_raw(&transaction_index_key(original_transaction_id))
            .await?
        {
            Some(device_id) => device_id,
            None => {
                warn!(
                    "No subscription record for original transaction id \
                     {original_transaction_id}; dropping status update"
                );
                return Ok(());
            }
        };

        let otid = original_transaction_id.to_string();
        self.store
            .update_json_with_retry(
                &subscription_key(&device_id),
                |current: Option<SubscriptionRecord>| {
                    let mut record =
                        current.unwrap_or_else(|| SubscriptionRecord::new(device_id.clone()));
                    record.original_transaction_id = Some(otid.clone());
                    if let Some(status) = status {
                        record.status = status;
                    }
                    if let Some(expires_date) = expires_date {
                        record.expires_date = Some(expires_date);
                    }
                    if let Some(auto_renew_enabled) = auto_renew_enabled {
                        record.auto_renew_enabled = auto_renew_enabled;
                    }
                    record
                },
            )
            .await?;
        Ok(())
    }

    /// Full webhook handling: verify the outer notification JWS, then the
    /// nested transaction JWS, then apply the derived status change.
    pub async fn process_notification(&self, signed_payload: &str) -> Result<(), Error> {
        let notification: NotificationPayload = self.decode_verified(signed_payload)?;
        let change = status_change(
            &notification.notification_type,
            notification.subtype.as_deref(),
        );

        let Some(signed_transaction) = &notification.data.signed_transaction_info else {
            warn!(
                "Notification `{}` carried no transaction info; nothing to apply",
                notification.notification_type
            );
            return Ok(());
        };
        let transaction: TransactionPayload = self.decode_verified(signed_transaction)?;

        if change.status.is_none() && change.auto_renew_enabled.is_none() {
            warn!(
                "Ignoring unhandled notification type `{}`",
                notification.notification_type
            );
            return Ok(());
        }

        let expires_date = transaction
            .expires_date
            .and_then(DateTime::from_timestamp_millis);
        self.update_status_by_original_transaction_id(
            &transaction.original_transaction_id,
            change.status,
            expires_date,
            change.auto_renew_enabled,
        )
        .await
    }

    /// Verifies an ES256 JWS against its inline x5c chain and the pinned
    /// roots, returning the decoded claims.
    fn decode_verified<T: DeserializeOwned>(&self, token: &str) -> Result<T, Error> {
        let header = decode_header(token).map_err(|e| {
            Error::new(ErrorDetails::SignatureVerification {
                message: format!("Malformed token header: {e}"),
            })
        })?;
        if header.alg != Algorithm::ES256 {
            return Err(Error::new(ErrorDetails::SignatureVerification {
                message: format!("Unexpected signing algorithm {:?}", header.alg),
            }));
        }
        let x5c = header.x5c.ok_or_else(|| {
            Error::new(ErrorDetails::SignatureVerification {
                message: "Token is missing its x5c certificate chain".to_string(),
            })
        })?;
        if x5c.is_empty() {
            return Err(Error::new(ErrorDetails::SignatureVerification {
                message: "Token has an empty x5c certificate chain".to_string(),
            }));
        }

        let chain_der = x5c
            .iter()
            .map(|cert| {
                BASE64_STANDARD.decode(cert).map_err(|e| {
                    Error::new(ErrorDetails::SignatureVerification {
                        message: format!("x5c certificate is not valid base64: {e}"),
                    })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let chain = chain_der
            .iter()
            .map(|der| {
                parse_x509_certificate(der)
                    .map(|(_, cert)| cert)
                    .map_err(|e| {
                        Error::new(ErrorDetails::SignatureVerification {
                            message: format!("x5c certificate failed to parse: {e}"),
                        })
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // These indexing operations cannot fail: the chain is non-empty
        let leaf = &chain[0];
        if !leaf.validity().is_valid() {
            return Err(Error::new(ErrorDetails::SignatureVerification {
                message: "Signing certificate is expired or not yet valid".to_string(),
            }));
        }
        for i in 0..chain.len() - 1 {
            chain[i]
                .verify_signature(Some(chain[i + 1].public_key()))
                .map_err(|e| {
                    Error::new(ErrorDetails::SignatureVerification {
                        message: format!("Certificate chain link {i} failed verification: {e}"),
                    })
                })?;
        }

        let root_der = &chain_der[chain_der.len() - 1];
        let root_fingerprint = Sha256::digest(root_der);
        if !self
            .root_fingerprints
            .iter()
            .any(|pinned| pinned.as_slice() == root_fingerprint.as_slice())
        {
            return Err(Error::new(ErrorDetails::SignatureVerification {
                message: "Certificate chain does not terminate in a trusted root".to_string(),
            }));
        }

        let decoding_key = DecodingKey::from_ec_der(&leaf.public_key().subject_public_key.data);
        let mut validation = Validation::new(Algorithm::ES256);
        // Transaction payloads carry no exp/aud claims
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let decoded = decode::<T>(token, &decoding_key, &validation).map_err(|e| {
            Error::new(ErrorDetails::SignatureVerification {
                message: format!("Token signature rejected: {e}"),
            })
        })?;
        Ok(decoded.claims)
    }
}

/// Status derivation, in priority order: revocation wins, then a future
/// expiry means active, anything else is expired.
fn derive_status(payload: &TransactionPayload, now: DateTime<Utc>) -> SubscriptionStatus {
    if payload.revocation_date.is_some() {
        return SubscriptionStatus::Revoked;
    }
    match payload.expires_date.and_then(DateTime::from_timestamp_millis) {
        Some(expires) if expires > now => SubscriptionStatus::Active,
        _ => SubscriptionStatus::Expired,
    }
}

/// Merge semantics for verification results: create with `plans_generated =
/// 0` when absent, otherwise update every field except `plans_generated`
/// (shared with the request handlers) and `auto_renew_enabled` (owned by the
/// webhook path).
fn merged_record(
    current: Option<SubscriptionRecord>,
    device_id: &str,
    payload: &TransactionPayload,
    status: SubscriptionStatus,
    expires_date: Option<DateTime<Utc>>,
    purchase_date: Option<DateTime<Utc>>,
) -> SubscriptionRecord {
    let mut record = current.unwrap_or_else(|| SubscriptionRecord::new(device_id.to_string()));
    record.original_transaction_id = Some(payload.original_transaction_id.clone());
    record.product_id = Some(payload.product_id.clone());
    record.status = status;
    record.expires_date = expires_date;
    record.purchase_date = purchase_date;
    record
}
