use std::sync::Arc;

use clap::Parser;
use scep_certs::{
    CertificateSigningRequest,
    bootstrap::{CA_CERTIFICATE_FILE_NAME, CA_KEY_FILE_NAME},
    keys::rsa::SigningKey,
};
use scep_server::{
    Pipeline, Service,
    cli::{Cli, Command},
    depot::{Depot, FileDepot},
    secret::Secret,
    service,
    signer::SignError,
};
use tempfile::TempDir;
use x509_cert::{Certificate, der::Decode, name::Name};

fn ca_arguments(depot: &std::path::Path) -> scep_server::cli::CaArguments {
    let cli = Cli::try_parse_from([
        "scepserver",
        "ca",
        "--init",
        "--depot",
        depot.to_str().unwrap(),
        "--key-size",
        "2048",
        "--organization",
        "Test",
        "--key-password",
        "ca-secret",
    ])
    .unwrap();

    match cli.command {
        Command::Ca(args) => args,
        Command::Run(_) => unreachable!("parsed the ca subcommand"),
    }
}

fn csr(common_name: &str, challenge: Option<&str>) -> CertificateSigningRequest {
    let key = SigningKey::new(1024).unwrap();
    let subject: Name = format!("CN={common_name},O=Devices").parse().unwrap();

    CertificateSigningRequest::builder()
        .subject(subject)
        .signing_key(&key)
        .maybe_challenge_password(challenge)
        .build()
        .unwrap()
}

async fn service(depot: &std::path::Path, challenge: &str) -> Service {
    let depot: Arc<dyn Depot> = Arc::new(FileDepot::new(depot));
    let pipeline = Pipeline::builder()
        .depot(depot)
        .ca_passphrase(Secret::new("ca-secret"))
        .challenge(Secret::new(challenge))
        .validity_days(30)
        .build()
        .await
        .unwrap();

    let (signer, ca) = pipeline.into_parts();
    Service::new(ca, signer).unwrap()
}

#[tokio::test]
async fn bootstrap_then_enroll() {
    let dir = TempDir::new().unwrap();
    let depot = dir.path().join("depot");

    scep_server::init_ca(&ca_arguments(&depot)).unwrap();
    assert!(depot.join(CA_KEY_FILE_NAME).is_file());
    assert!(depot.join(CA_CERTIFICATE_FILE_NAME).is_file());

    let service = service(&depot, "letmein").await;
    let ca_cert = Certificate::from_der(&service.get_ca_cert().unwrap()).unwrap();

    let request = csr("device-1", Some("letmein"));
    let der = service.pki_operation(request.raw()).await.unwrap();
    let certificate = Certificate::from_der(&der).unwrap();

    assert_eq!(certificate.tbs_certificate.subject, *request.subject());
    assert_eq!(
        certificate.tbs_certificate.issuer,
        ca_cert.tbs_certificate.subject
    );
    assert_eq!(certificate.tbs_certificate.serial_number.as_bytes(), [2]);

    let stored = FileDepot::new(&depot)
        .find_valid(request.subject())
        .await
        .unwrap();
    assert_eq!(stored, Some(certificate));
}

#[tokio::test]
async fn policy_violations_are_reported() {
    let dir = TempDir::new().unwrap();
    let depot = dir.path().join("depot");
    scep_server::init_ca(&ca_arguments(&depot)).unwrap();

    let service = service(&depot, "letmein").await;

    let err = service
        .pki_operation(csr("device-1", Some("wrong")).raw())
        .await
        .expect_err("the challenge does not match");
    assert!(err.is_client_error());
    assert!(matches!(
        err,
        service::Error::Sign {
            source: SignError::ChallengeMismatch
        }
    ));

    service
        .pki_operation(csr("device-1", Some("letmein")).raw())
        .await
        .unwrap();
    let err = service
        .pki_operation(csr("device-1", Some("letmein")).raw())
        .await
        .expect_err("30 days left is outside of the renewal window");
    assert!(matches!(
        err,
        service::Error::Sign {
            source: SignError::RenewalNotAllowed { .. }
        }
    ));
}

#[test]
fn second_bootstrap_keeps_the_existing_ca() {
    let dir = TempDir::new().unwrap();
    let depot = dir.path().join("depot");
    let args = ca_arguments(&depot);

    scep_server::init_ca(&args).unwrap();
    let key = std::fs::read(depot.join(CA_KEY_FILE_NAME)).unwrap();
    let certificate = std::fs::read(depot.join(CA_CERTIFICATE_FILE_NAME)).unwrap();

    let err = scep_server::init_ca(&args).expect_err("the CA already exists");
    let scep_server::Error::InitializeCa { source } = err else {
        unreachable!("bootstrap errors are reported as InitializeCa");
    };
    assert!(source.is_collision());

    assert_eq!(std::fs::read(depot.join(CA_KEY_FILE_NAME)).unwrap(), key);
    assert_eq!(
        std::fs::read(depot.join(CA_CERTIFICATE_FILE_NAME)).unwrap(),
        certificate
    );
}
