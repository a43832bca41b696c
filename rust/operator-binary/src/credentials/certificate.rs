use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        X509Builder, X509Name, X509NameBuilder, X509,
    },
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

const RSA_KEY_BITS: u32 = 2048;
const CA_VALIDITY_DAYS: u32 = 3650;
const LEAF_VALIDITY_DAYS: u32 = 365;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to generate private key"))]
    GenerateKey { source: ErrorStack },

    #[snafu(display("failed to build certificate for {common_name:?}"))]
    BuildCertificate {
        source: ErrorStack,
        common_name: String,
    },

    #[snafu(display("failed to parse CA certificate"))]
    ParseCaCertificate { source: ErrorStack },

    #[snafu(display("failed to parse CA private key"))]
    ParseCaPrivateKey { source: ErrorStack },

    #[snafu(display("failed to PEM-encode certificate material"))]
    EncodePem { source: ErrorStack },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// A certificate together with the private key it was issued for.
pub struct CertificateBundle {
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl CertificateBundle {
    /// Loads a CA from the PEM fields of its secret.
    pub fn from_pem(certificate: &[u8], private_key: &[u8]) -> Result<Self> {
        Ok(Self {
            certificate: X509::from_pem(certificate).context(ParseCaCertificateSnafu)?,
            private_key: PKey::private_key_from_pem(private_key)
                .context(ParseCaPrivateKeySnafu)?,
        })
    }

    pub fn certificate_pem(&self) -> Result<Vec<u8>> {
        self.certificate.to_pem().context(EncodePemSnafu)
    }

    pub fn private_key_pem(&self) -> Result<Vec<u8>> {
        self.private_key
            .private_key_to_pem_pkcs8()
            .context(EncodePemSnafu)
    }
}

/// Subject of a leaf certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafSubject {
    pub common_name: String,
    pub organization: String,
}

pub fn generate_self_signed_ca(common_name: &str) -> Result<CertificateBundle> {
    let private_key = generate_private_key()?;
    let build = || -> Result<X509, ErrorStack> {
        let name = subject_name(common_name, None)?;
        let mut builder = certificate_builder(&name, &name, &private_key, CA_VALIDITY_DAYS)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .digital_signature()
                .build()?,
        )?;
        let subject_key_id =
            SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(subject_key_id)?;
        builder.sign(&private_key, MessageDigest::sha256())?;
        Ok(builder.build())
    };
    let certificate = build().context(BuildCertificateSnafu { common_name })?;

    Ok(CertificateBundle {
        certificate,
        private_key,
    })
}

/// Issues a certificate usable for both serving and client authentication, signed by `ca`.
pub fn generate_signed_leaf(
    subject: &LeafSubject,
    dns_names: &[String],
    ca: &CertificateBundle,
) -> Result<CertificateBundle> {
    let private_key = generate_private_key()?;
    let build = || -> Result<X509, ErrorStack> {
        let name = subject_name(&subject.common_name, Some(&subject.organization))?;
        let mut builder = certificate_builder(
            &name,
            ca.certificate.subject_name(),
            &private_key,
            LEAF_VALIDITY_DAYS,
        )?;
        builder.append_extension(BasicConstraints::new().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;

        let (alt_names, authority_key_id) = {
            let context = builder.x509v3_context(Some(&ca.certificate), None);
            let mut alt_names = SubjectAlternativeName::new();
            for dns_name in dns_names {
                alt_names.dns(dns_name);
            }
            (
                alt_names.build(&context)?,
                AuthorityKeyIdentifier::new()
                    .keyid(false)
                    .issuer(false)
                    .build(&context)?,
            )
        };
        builder.append_extension(alt_names)?;
        builder.append_extension(authority_key_id)?;
        builder.sign(&ca.private_key, MessageDigest::sha256())?;
        Ok(builder.build())
    };
    let certificate = build().context(BuildCertificateSnafu {
        common_name: &subject.common_name,
    })?;

    Ok(CertificateBundle {
        certificate,
        private_key,
    })
}

fn generate_private_key() -> Result<PKey<Private>> {
    Rsa::generate(RSA_KEY_BITS)
        .and_then(PKey::from_rsa)
        .context(GenerateKeySnafu)
}

fn subject_name(common_name: &str, organization: Option<&str>) -> Result<X509Name, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    if let Some(organization) = organization {
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
    }
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(name.build())
}

fn certificate_builder(
    subject: &X509Name,
    issuer: &openssl::x509::X509NameRef,
    private_key: &PKey<Private>,
    validity_days: u32,
) -> Result<X509Builder, ErrorStack> {
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&random_serial()?)?;
    builder.set_subject_name(subject)?;
    builder.set_issuer_name(issuer)?;
    builder.set_pubkey(private_key)?;
    builder.set_not_before(&Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&Asn1Time::days_from_now(validity_days)?)?;
    Ok(builder)
}

fn random_serial() -> Result<Asn1Integer, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}
