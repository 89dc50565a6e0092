// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Collector identity resolution (spec section 4.5): the authoritative
//! value is the CN of the peer certificate when mTLS is enabled; in dev
//! mode it is whatever the client declared.

use tonic::Request;

use crate::registry::Registry;

/// Dev-mode identity inference: find the collector that owns `session_id`.
/// Ambiguity (multiple collectors owning the same session id) is fatal for
/// the message carrying it (spec section 4.5) and is reported as `None`.
pub fn infer_dev_mode_collector_id(registry: &Registry, session_id: &str) -> Option<String> {
    let mut owners: Vec<String> = registry
        .list_targets()
        .into_iter()
        .filter(|s| s.session_id == session_id)
        .map(|s| s.collector_id)
        .collect();
    owners.dedup();
    match owners.len() {
        1 => owners.pop(),
        _ => None,
    }
}

/// Extracts the Common Name from a DER-encoded X.509 certificate without
/// pulling in a full ASN.1 parser: scans for the `commonName` OID
/// (2.5.4.3, DER bytes `06 03 55 04 03`) and reads the UTF8String/
/// PrintableString value that immediately follows it. Sufficient for the
/// certificates this reference deployment issues; a production CA that
/// emits unusual attribute encodings would need a real parser.
pub fn extract_cn(der: &[u8]) -> Option<String> {
    const CN_OID: [u8; 5] = [0x06, 0x03, 0x55, 0x04, 0x03];
    let pos = der
        .windows(CN_OID.len())
        .position(|w| w == CN_OID)?;
    let after_oid = &der[pos + CN_OID.len()..];
    if after_oid.len() < 2 {
        return None;
    }
    let tag = after_oid[0];
    if !matches!(tag, 0x0c | 0x13 | 0x16) {
        return None;
    }
    let len = after_oid[1] as usize;
    let value = after_oid.get(2..2 + len)?;
    String::from_utf8(value.to_vec()).ok()
}

/// Resolves the caller's collector id: the verified peer certificate's CN
/// when `mtls_enabled`, otherwise `declared` as presented in the request
/// body (dev mode).
pub fn resolve_collector_id<T>(
    req: &Request<T>,
    declared: &str,
    mtls_enabled: bool,
) -> Result<String, tonic::Status> {
    if !mtls_enabled {
        return Ok(declared.to_string());
    }

    let certs = req
        .peer_certs()
        .ok_or_else(|| tonic::Status::unauthenticated("missing client certificate"))?;
    let leaf = certs
        .first()
        .ok_or_else(|| tonic::Status::unauthenticated("empty certificate chain"))?;
    extract_cn(leaf.as_ref())
        .ok_or_else(|| tonic::Status::unauthenticated("certificate missing a common name"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_cn_from_minimal_der_fragment() {
        let mut der = vec![0x30, 0x00]; // unrelated leading bytes
        der.extend_from_slice(&[0x06, 0x03, 0x55, 0x04, 0x03]);
        der.push(0x0c); // UTF8String
        der.push(7); // length
        der.extend_from_slice(b"col-123");
        assert_eq!(extract_cn(&der).as_deref(), Some("col-123"));
    }

    #[test]
    fn returns_none_when_oid_absent() {
        let der = vec![0x30, 0x05, 0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(extract_cn(&der), None);
    }
}
