// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Vendor connection records (external identity plus OAuth tokens).

use crate::models::Vendor;
use serde::{Deserialize, Serialize};

/// Link between a local user and a vendor account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorConnection {
    /// Local user ID
    pub user_id: String,
    pub vendor: Vendor,
    /// Vendor-side user ID (Strava athlete ID, Garmin user ID)
    pub external_user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token expires (ISO 8601)
    pub expires_at: String,
    /// Granted OAuth scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Set when a refresh failed; the user has to connect again
    #[serde(default)]
    pub needs_reconnect: bool,
    pub updated_at: String,
}

impl VendorConnection {
    /// Document ID: one connection per user and vendor.
    pub fn document_id(&self) -> String {
        connection_document_id(&self.user_id, self.vendor)
    }
}

pub fn connection_document_id(user_id: &str, vendor: Vendor) -> String {
    format!("{}_{}", vendor.as_str(), user_id)
}
