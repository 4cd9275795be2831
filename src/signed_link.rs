use crate::{
    cryptography::{decode_signature, SigningKeys},
    error::{Error, SignedLinkError},
    r#trait::{Clock, Expired},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map, BTreeMap},
    fmt,
    sync::Arc,
};
use url::{form_urlencoded, Url};

pub const EXPIRES_KEY: &str = "expires";
pub const SIGNATURE_KEY: &str = "signature";

/// Caller supplied link parameters, kept sorted by key so encoding is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkParameters(BTreeMap<String, String>);

impl LinkParameters {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LinkParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect::<BTreeMap<String, String>>(),
        )
    }
}

impl IntoIterator for LinkParameters {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// `key=value` pairs in byte order of the keys, form-urlencoded and joined by `&`.
/// `*` is percent-encoded as well, so only alphanumerics and `-._` pass through.
fn canonical_query(parameters: &BTreeMap<String, String>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(parameters.iter())
        .finish()
        .replace('*', "%2A")
}

fn signed_content(base_url: &str, canonical_query: &str) -> String {
    format!("{}?{}", base_url, canonical_query)
}

/// Strips the query and fragment, leaving the part of a link that is signed alongside the query.
fn base_of(url: &Url) -> String {
    let mut base = url.to_owned();
    base.set_query(None);
    base.set_fragment(None);
    base.to_string()
}

/// A generated link. Renders as `<base>?<sorted params incl. expires>&signature=<hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiringLink {
    base_url: String,
    parameters: LinkParameters,
    expires: i64,
    canonical_query: String,
    signature: String,
}

impl ExpiringLink {
    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
    pub fn get_parameters(&self) -> &LinkParameters {
        &self.parameters
    }
    pub fn get_expires(&self) -> i64 {
        self.expires
    }
    pub fn get_expiry(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires, 0)
    }
    pub fn get_signature(&self) -> &str {
        &self.signature
    }
}

impl fmt::Display for ExpiringLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}?{}&{}={}",
            self.base_url, self.canonical_query, SIGNATURE_KEY, self.signature
        )
    }
}

/// Generates and verifies signed, expiring links. Holds no mutable state.
pub struct SignedLinkService {
    base_url: String,
    keys: SigningKeys,
    clock: Arc<dyn Clock>,
}

impl SignedLinkService {
    pub fn new(base_url: &Url, keys: SigningKeys, clock: Arc<dyn Clock>) -> Self {
        Self {
            base_url: base_of(base_url),
            keys,
            clock,
        }
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }

    /// Signs `parameters` with an expiry of now plus `lifetime` and returns the URL.
    pub fn generate(&self, parameters: &LinkParameters, lifetime: Duration) -> Result<String, Error> {
        Ok(self.generate_link(parameters, lifetime)?.to_string())
    }

    pub fn generate_link(
        &self,
        parameters: &LinkParameters,
        lifetime: Duration,
    ) -> Result<ExpiringLink, Error> {
        if lifetime <= Duration::zero() {
            return Err(SignedLinkError::InvalidParameter(format!(
                "lifetime must be positive, got {}s",
                lifetime.num_seconds()
            ))
            .into());
        }
        let expiry = match self.clock.now().checked_add_signed(lifetime) {
            Some(expiry) => expiry,
            None => {
                return Err(SignedLinkError::InvalidParameter(
                    "lifetime overflows the expiry timestamp".into(),
                )
                .into())
            }
        };
        self.generate_with_expiry(parameters, expiry)
    }

    pub fn generate_with_expiry(
        &self,
        parameters: &LinkParameters,
        expiry: DateTime<Utc>,
    ) -> Result<ExpiringLink, Error> {
        for reserved in [EXPIRES_KEY, SIGNATURE_KEY] {
            if parameters.contains_key(reserved) {
                return Err(SignedLinkError::InvalidParameter(format!(
                    "{} is a reserved parameter",
                    reserved
                ))
                .into());
            }
        }
        let expires = expiry.timestamp();
        let mut signed_parameters = parameters.0.to_owned();
        let _ = signed_parameters.insert(EXPIRES_KEY.to_string(), expires.to_string());
        let canonical_query = canonical_query(&signed_parameters);
        let signature = self
            .keys
            .sign(signed_content(&self.base_url, &canonical_query).as_bytes())?;
        Ok(ExpiringLink {
            base_url: self.base_url.to_owned(),
            parameters: parameters.to_owned(),
            expires,
            canonical_query,
            signature,
        })
    }

    /// Checks the signature, then the expiry, and hands back the signed parameters.
    pub fn verify(&self, url: &str) -> Result<LinkParameters, Error> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => return Err(SignedLinkError::MalformedUrl(err.to_string()).into()),
        };
        if parsed.query().is_none() {
            return Err(SignedLinkError::MalformedUrl("missing query string".into()).into());
        }
        let mut parameters: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in parsed.query_pairs() {
            if parameters
                .insert(key.to_string(), value.into_owned())
                .is_some()
            {
                return Err(
                    SignedLinkError::MalformedUrl(format!("duplicate parameter {}", key)).into(),
                );
            }
        }
        let signature = match parameters.remove(SIGNATURE_KEY) {
            Some(signature) => signature,
            None => {
                return Err(
                    SignedLinkError::MalformedUrl(format!("missing {}", SIGNATURE_KEY)).into(),
                )
            }
        };
        let expires: i64 = match parameters.get(EXPIRES_KEY).map(|value| value.parse::<i64>()) {
            Some(Ok(expires)) => expires,
            _ => return Err(SignedLinkError::MissingExpiration.into()),
        };

        // Links minted for another base under the same keys are not ours.
        let same_base = base_of(&parsed) == self.base_url;
        let content = signed_content(&self.base_url, &canonical_query(&parameters));
        let verified = match decode_signature(&signature) {
            Some(signature) => self.keys.verify(content.as_bytes(), &signature)? && same_base,
            None => false,
        };
        if !verified {
            #[cfg(feature = "debug-logging")]
            tracing::debug!("Signature mismatch for signed content {}", content);
            return Err(SignedLinkError::InvalidSignature.into());
        }
        if expires.expired(self.clock.as_ref()) {
            #[cfg(feature = "debug-logging")]
            tracing::debug!(
                "Link expired at {}, now {}",
                expires,
                self.clock.now().timestamp()
            );
            return Err(SignedLinkError::LinkExpired.into());
        }

        let _ = parameters.remove(EXPIRES_KEY);
        Ok(LinkParameters(parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, cryptography::SecretKey};

    const T: i64 = 1_700_000_000;
    const BASE_URL: &str = "https://example.com/invitation";
    const GOLDEN_URL: &str = "https://example.com/invitation?expires=1700003600&hash=abc&id=42&signature=91c53aae6c92813cc851145e89732619b6da4e4003ba357f0235636026ac402e";

    fn keys(secret: &str) -> SigningKeys {
        SigningKeys::new(SecretKey::from_config_value(secret).unwrap(), Vec::new())
    }

    fn service_with(secret: &str) -> (SignedLinkService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T));
        let service = SignedLinkService::new(
            &Url::parse(BASE_URL).unwrap(),
            keys(secret),
            clock.to_owned(),
        );
        (service, clock)
    }

    fn invitation_parameters() -> LinkParameters {
        [("id", "42"), ("hash", "abc")].into_iter().collect()
    }

    fn verify_err(service: &SignedLinkService, url: &str) -> SignedLinkError {
        match service.verify(url) {
            Err(Error::SignedLink(err)) => err,
            other => panic!("expected a signed link error, got {:?}", other),
        }
    }

    #[test]
    fn golden_vector() {
        let (service, clock) = service_with("s3cr3t");
        let url = service
            .generate(&invitation_parameters(), Duration::seconds(3600))
            .unwrap();
        assert_eq!(url, GOLDEN_URL);

        clock.advance(Duration::seconds(10));
        assert_eq!(service.verify(GOLDEN_URL).unwrap(), invitation_parameters());
    }

    #[test]
    fn generated_link_exposes_its_parts() {
        let (service, _clock) = service_with("s3cr3t");
        let link = service
            .generate_link(&invitation_parameters(), Duration::seconds(3600))
            .unwrap();
        assert_eq!(link.get_base_url(), BASE_URL);
        assert_eq!(link.get_expires(), T + 3600);
        assert_eq!(link.get_expiry().unwrap().timestamp(), T + 3600);
        assert_eq!(link.get_parameters(), &invitation_parameters());
        assert_eq!(link.get_signature().len(), 64);
        assert!(link.to_string().ends_with(&format!("&signature={}", link.get_signature())));
    }

    #[test]
    fn round_trip_with_encoded_values() {
        let (service, clock) = service_with("s3cr3t");
        let parameters: LinkParameters = [
            ("id", "42"),
            ("hash", "abc"),
            ("name", "Jane Doe&Co"),
            ("note", "ünïcode/?=#"),
        ]
        .into_iter()
        .collect();
        let url = service.generate(&parameters, Duration::minutes(60)).unwrap();
        assert!(url.contains("name=Jane+Doe%26Co"));

        clock.advance(Duration::minutes(59));
        assert_eq!(service.verify(&url).unwrap(), parameters);
    }

    #[test]
    fn encoded_values_match_reference_signature() {
        let (service, _clock) = service_with("s3cr3t");
        let parameters: LinkParameters = [("id", "42"), ("hash", "abc"), ("name", "Jane Doe&Co")]
            .into_iter()
            .collect();
        let link = service
            .generate_link(&parameters, Duration::seconds(3600))
            .unwrap();
        assert_eq!(
            link.get_signature(),
            "fc11e4addc96588bf42f23646c358d247310a9dff8150ad2d28efdaf19c263b6"
        );
    }

    #[test]
    fn empty_parameters_round_trip() {
        let (service, _clock) = service_with("s3cr3t");
        let url = service
            .generate(&LinkParameters::new(), Duration::seconds(30))
            .unwrap();
        assert!(service.verify(&url).unwrap().is_empty());
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let (service, _clock) = service_with("s3cr3t");
        let mut forward = LinkParameters::new();
        let mut backward = LinkParameters::new();
        let pairs = [("id", "42"), ("hash", "abc"), ("Zeta", "1"), ("alpha", "2")];
        for (key, value) in pairs.iter() {
            let _ = forward.insert(*key, *value);
        }
        for (key, value) in pairs.iter().rev() {
            let _ = backward.insert(*key, *value);
        }
        let forward_url = service.generate(&forward, Duration::seconds(60)).unwrap();
        let backward_url = service.generate(&backward, Duration::seconds(60)).unwrap();
        assert_eq!(forward_url, backward_url);
        assert!(forward_url.contains("?Zeta=1&alpha=2&expires="));
    }

    #[test]
    fn reordered_query_still_verifies() {
        let (service, _clock) = service_with("s3cr3t");
        let reordered = "https://example.com/invitation?id=42&signature=91c53aae6c92813cc851145e89732619b6da4e4003ba357f0235636026ac402e&hash=abc&expires=1700003600";
        assert_eq!(service.verify(reordered).unwrap(), invitation_parameters());
    }

    #[test]
    fn any_changed_value_character_is_detected() {
        fn flip(c: char) -> char {
            match c {
                '0'..='8' | 'a'..='y' => (c as u8 + 1) as char,
                '9' => '0',
                'z' => 'a',
                _ => 'x',
            }
        }

        let (service, _clock) = service_with("s3cr3t");
        let query_start = GOLDEN_URL.find('?').unwrap() + 1;
        let mut in_value = false;
        let mut checked = 0;
        for (index, c) in GOLDEN_URL.char_indices().skip(query_start) {
            match c {
                '=' => in_value = true,
                '&' => in_value = false,
                _ if in_value => {
                    let mut tampered = GOLDEN_URL.to_string();
                    tampered.replace_range(index..index + 1, &flip(c).to_string());
                    assert_eq!(
                        verify_err(&service, &tampered),
                        SignedLinkError::InvalidSignature,
                        "tampered url {} was accepted",
                        tampered
                    );
                    checked += 1;
                }
                _ => {}
            }
        }
        assert_eq!(checked, 10 + 3 + 2 + 64);
    }

    #[test]
    fn added_or_removed_parameters_are_detected() {
        let (service, _clock) = service_with("s3cr3t");
        let added = GOLDEN_URL.replace("&id=42", "&id=42&role=admin");
        assert_eq!(verify_err(&service, &added), SignedLinkError::InvalidSignature);
        let removed = GOLDEN_URL.replace("&hash=abc", "");
        assert_eq!(verify_err(&service, &removed), SignedLinkError::InvalidSignature);
    }

    #[test]
    fn link_for_another_base_is_rejected() {
        let (service, _clock) = service_with("s3cr3t");
        let moved = GOLDEN_URL.replace("/invitation", "/password-reset");
        assert_eq!(verify_err(&service, &moved), SignedLinkError::InvalidSignature);
    }

    #[test]
    fn services_sharing_keys_do_not_accept_each_others_links() {
        let clock = Arc::new(ManualClock::new(T));
        let shared = keys("s3cr3t");
        let invitation = SignedLinkService::new(
            &Url::parse(BASE_URL).unwrap(),
            shared.to_owned(),
            clock.to_owned(),
        );
        let password_reset = SignedLinkService::new(
            &Url::parse("https://example.com/password-reset").unwrap(),
            shared,
            clock,
        );
        let reset_url = password_reset
            .generate(&invitation_parameters(), Duration::seconds(3600))
            .unwrap();
        assert_eq!(
            password_reset.verify(&reset_url).unwrap(),
            invitation_parameters()
        );
        assert_eq!(verify_err(&invitation, &reset_url), SignedLinkError::InvalidSignature);
        assert_eq!(verify_err(&password_reset, GOLDEN_URL), SignedLinkError::InvalidSignature);

        let other_host = GOLDEN_URL.replace("example.com", "example.org");
        assert_eq!(verify_err(&invitation, &other_host), SignedLinkError::InvalidSignature);
    }

    #[test]
    fn asterisk_is_percent_encoded() {
        let (service, clock) = service_with("s3cr3t");
        let mut parameters = invitation_parameters();
        let _ = parameters.insert("note", "a*b");
        let link = service
            .generate_link(&parameters, Duration::seconds(3600))
            .unwrap();
        assert!(link.to_string().contains("&note=a%2Ab&"));
        assert_eq!(
            link.get_signature(),
            "af5a668fe92157a53e93afaa007e41f2a0e1f0c38913d231f01b3cdac39de551"
        );

        clock.advance(Duration::seconds(10));
        assert_eq!(service.verify(&link.to_string()).unwrap(), parameters);
        let literal = link.to_string().replace("a%2Ab", "a*b");
        assert_eq!(service.verify(&literal).unwrap(), parameters);
    }

    #[test]
    fn any_changed_key_character_is_detected() {
        let (service, _clock) = service_with("s3cr3t");
        for (from, to) in [("hash=", "hasi="), ("id=", "ie="), ("&hash", "&Hash")] {
            let tampered = GOLDEN_URL.replacen(from, to, 1);
            assert_ne!(tampered, GOLDEN_URL);
            assert_eq!(
                verify_err(&service, &tampered),
                SignedLinkError::InvalidSignature,
                "tampered url {} was accepted",
                tampered
            );
        }
    }

    #[test]
    fn uppercase_signature_is_rejected() {
        let (service, _clock) = service_with("s3cr3t");
        let (head, signature) = GOLDEN_URL.split_once("signature=").unwrap();
        let uppercase = format!("{}signature={}", head, signature.to_uppercase());
        assert_eq!(verify_err(&service, &uppercase), SignedLinkError::InvalidSignature);
    }

    #[test]
    fn expired_link_is_rejected() {
        let (service, clock) = service_with("s3cr3t");
        let url = service
            .generate(&invitation_parameters(), Duration::seconds(1))
            .unwrap();
        clock.advance(Duration::seconds(1));
        assert!(service.verify(&url).is_ok());
        clock.advance(Duration::seconds(1));
        assert_eq!(verify_err(&service, &url), SignedLinkError::LinkExpired);
    }

    #[test]
    fn tampered_and_expired_reports_signature_first() {
        let (service, clock) = service_with("s3cr3t");
        clock.advance(Duration::days(1));
        let tampered = GOLDEN_URL.replace("id=42", "id=43");
        assert_eq!(verify_err(&service, &tampered), SignedLinkError::InvalidSignature);
        assert_eq!(verify_err(&service, GOLDEN_URL), SignedLinkError::LinkExpired);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (service, _clock) = service_with("not-the-secret");
        assert_eq!(verify_err(&service, GOLDEN_URL), SignedLinkError::InvalidSignature);
    }

    #[test]
    fn rotated_secret_still_verifies_old_links() {
        let clock = Arc::new(ManualClock::new(T));
        let service = SignedLinkService::new(
            &Url::parse(BASE_URL).unwrap(),
            SigningKeys::new(
                SecretKey::from_config_value("rotated").unwrap(),
                vec![SecretKey::from_config_value("s3cr3t").unwrap()],
            ),
            clock,
        );
        assert_eq!(service.verify(GOLDEN_URL).unwrap(), invitation_parameters());
        let fresh = service
            .generate(&invitation_parameters(), Duration::seconds(3600))
            .unwrap();
        assert_ne!(fresh, GOLDEN_URL);
        assert!(service.verify(&fresh).is_ok());
    }

    #[test]
    fn reserved_keys_are_rejected() {
        let (service, _clock) = service_with("s3cr3t");
        for reserved in [EXPIRES_KEY, SIGNATURE_KEY] {
            let mut parameters = invitation_parameters();
            let _ = parameters.insert(reserved, "1");
            assert!(matches!(
                service.generate(&parameters, Duration::seconds(60)),
                Err(Error::SignedLink(SignedLinkError::InvalidParameter(_)))
            ));
        }
    }

    #[test]
    fn non_positive_lifetime_is_rejected() {
        let (service, _clock) = service_with("s3cr3t");
        for lifetime in [Duration::zero(), Duration::seconds(-5)] {
            assert!(matches!(
                service.generate(&invitation_parameters(), lifetime),
                Err(Error::SignedLink(SignedLinkError::InvalidParameter(_)))
            ));
        }
    }

    #[test]
    fn malformed_urls_are_rejected() {
        let (service, _clock) = service_with("s3cr3t");
        for url in [
            "not a url",
            "https://example.com/invitation",
            "https://example.com/invitation?expires=1700003600&hash=abc&id=42",
            "https://example.com/invitation?id=1&id=2&expires=1700003600&signature=00",
        ] {
            assert!(
                matches!(verify_err(&service, url), SignedLinkError::MalformedUrl(_)),
                "{} was not reported as malformed",
                url
            );
        }
    }

    #[test]
    fn missing_or_garbled_expiration_is_reported() {
        let (service, _clock) = service_with("s3cr3t");
        let missing = GOLDEN_URL.replace("expires=1700003600&", "");
        assert_eq!(verify_err(&service, &missing), SignedLinkError::MissingExpiration);
        let garbled = GOLDEN_URL.replace("expires=1700003600", "expires=soon");
        assert_eq!(verify_err(&service, &garbled), SignedLinkError::MissingExpiration);
    }

    #[test]
    fn errors_do_not_leak_secret_or_expected_signature() {
        let (service, _clock) = service_with("s3cr3t");
        let tampered = GOLDEN_URL.replace("id=42", "id=43");
        let expected = service
            .generate_with_expiry(
                &[("id", "43"), ("hash", "abc")]
                    .into_iter()
                    .collect::<LinkParameters>(),
                DateTime::from_timestamp(T + 3600, 0).unwrap(),
            )
            .unwrap();
        let message = service.verify(&tampered).unwrap_err().to_string();
        assert!(!message.contains("s3cr3t"));
        assert!(!message.contains(expected.get_signature()));
    }

    #[test]
    fn verification_is_shareable_across_threads() {
        let (service, _clock) = service_with("s3cr3t");
        let service = Arc::new(service);
        let handles = (0..8)
            .map(|_| {
                let service = service.to_owned();
                std::thread::spawn(move || service.verify(GOLDEN_URL).map(|p| p.len()).ok())
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(2));
        }
    }
}
