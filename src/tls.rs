use crate::config::Config;
use crate::error::{AppError, Result};
use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, SanType};
use std::net::IpAddr;
use std::str::FromStr;

/// Resolves the TLS configuration the collector listens with: a file-based
/// keypair when `tls_cert_file`/`tls_key_file` are both set, otherwise an
/// in-process self-signed certificate when `tls_auto_self_signed` is on.
pub async fn resolve(config: &Config) -> Result<RustlsConfig> {
    if let (Some(cert), Some(key)) = (&config.tls_cert_file, &config.tls_key_file) {
        return RustlsConfig::from_pem_file(cert, key)
            .await
            .map_err(|e| AppError::Tls(format!("failed to load TLS keypair: {e}")));
    }

    if config.tls_auto_self_signed {
        let (cert_pem, key_pem) = generate_self_signed()?;
        return RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes())
            .await
            .map_err(|e| AppError::Tls(format!("failed to load generated TLS keypair: {e}")));
    }

    Err(AppError::Tls(
        "no TLS keypair configured and self-signed generation is disabled".to_string(),
    ))
}

/// Generates a self-signed certificate covering `collector`/`localhost` and
/// `127.0.0.1`, valid for one year, suitable for development and single-node
/// deployments where a real CA-issued certificate hasn't been provisioned.
fn generate_self_signed() -> Result<(String, String)> {
    let mut params = CertificateParams::new(vec!["collector".to_string(), "localhost".to_string()])
        .map_err(|e| AppError::Tls(format!("failed to build cert params: {e}")))?;

    params.is_ca = IsCa::NoCa;
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, "trace-lite-collector");
    params.distinguished_name = distinguished_name;

    let loopback = IpAddr::from_str("127.0.0.1").expect("valid literal IP");
    params.subject_alt_names.push(SanType::IpAddress(loopback));

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    let key_pair = rcgen::KeyPair::generate().map_err(|e| AppError::Tls(format!("failed to generate key: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| AppError::Tls(format!("failed to self-sign cert: {e}")))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}
