//! Face identity resolution against the enrollment store.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::recognition::domain::face_verifier::FaceVerifier;
use crate::recognition::infrastructure::enrollment_store::{
    EnrollOutcome, EnrollmentError, EnrollmentStore,
};
use crate::shared::config::RecognitionConfig;
use crate::shared::constants::UNKNOWN_NAME;
use crate::shared::frame::Frame;

/// Result of matching one face against every enrolled identity.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub identity: String,
    /// Verifier distance of the best match; 1.0 when unmatched.
    pub distance: f64,
}

impl Recognition {
    pub fn unknown() -> Self {
        Self {
            identity: UNKNOWN_NAME.to_string(),
            distance: 1.0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.identity != UNKNOWN_NAME
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolverSettings {
    /// Largest distance the verifier still calls the same person.
    pub verify_threshold: f64,
    /// Stop checking an identity's references below this distance.
    pub strong_match_distance: f64,
    /// Stop checking further identities below this distance.
    pub early_exit_distance: f64,
    pub references_per_identity: usize,
    pub max_faces_per_identity: usize,
}

impl From<&RecognitionConfig> for ResolverSettings {
    fn from(c: &RecognitionConfig) -> Self {
        Self {
            verify_threshold: c.verify_threshold,
            strong_match_distance: c.strong_match_distance,
            early_exit_distance: c.early_exit_distance,
            references_per_identity: c.references_per_identity,
            max_faces_per_identity: c.max_faces_per_identity,
        }
    }
}

struct Reference {
    path: PathBuf,
    image: Arc<Frame>,
}

pub struct IdentityResolver {
    store: EnrollmentStore,
    verifier: Box<dyn FaceVerifier>,
    settings: ResolverSettings,
    references: HashMap<String, Vec<Reference>>,
}

impl IdentityResolver {
    pub fn new(
        store: EnrollmentStore,
        verifier: Box<dyn FaceVerifier>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            settings,
            references: HashMap::new(),
        }
    }

    pub fn store(&self) -> &EnrollmentStore {
        &self.store
    }

    /// Best verified identity for `face`, or `("Unknown", 1.0)`.
    ///
    /// Store and verifier failures degrade to no match.
    pub fn recognize(&mut self, face: &Frame) -> Recognition {
        let identities = match self.store.identities() {
            Ok(ids) => ids,
            Err(e) => {
                log::warn!("recognition skipped: {e}");
                return Recognition::unknown();
            }
        };

        let mut best = Recognition::unknown();
        for identity in identities {
            self.load_references(&identity);
            let Some(references) = self.references.get(&identity) else {
                continue;
            };
            for reference in references.iter().take(self.settings.references_per_identity) {
                let distance = match self.verifier.distance(face, &reference.image) {
                    Ok(d) => d,
                    Err(e) => {
                        log::debug!("verify against {} failed: {e}", reference.path.display());
                        continue;
                    }
                };
                if distance <= self.settings.verify_threshold && distance < best.distance {
                    best = Recognition {
                        identity: identity.clone(),
                        distance,
                    };
                    if best.distance < self.settings.strong_match_distance {
                        break;
                    }
                }
            }
            if best.distance < self.settings.early_exit_distance {
                break;
            }
        }
        best
    }

    /// Adds `face` to `identity`'s reference set under the quality-floor
    /// retention policy.
    pub fn enroll_or_update(
        &mut self,
        identity: &str,
        face: &Frame,
        quality: f64,
    ) -> Result<EnrollOutcome, EnrollmentError> {
        let outcome = self.store.enroll_or_update(
            identity,
            face,
            quality,
            self.settings.max_faces_per_identity,
        )?;
        if outcome != EnrollOutcome::Rejected {
            self.references.remove(identity);
        }
        Ok(outcome)
    }

    pub fn next_available_id(&self) -> u64 {
        self.store.next_available_id()
    }

    /// Decodes the best-quality references of `identity` once; the entry
    /// is dropped whenever the identity's images change.
    fn load_references(&mut self, identity: &str) {
        if self.references.contains_key(identity) {
            return;
        }
        let stored = match self.store.stored_faces(identity) {
            Ok(faces) => faces,
            Err(e) => {
                log::debug!("cannot list references of {identity}: {e}");
                return;
            }
        };
        let loaded: Vec<Reference> = stored
            .into_iter()
            .rev()
            .take(self.settings.references_per_identity)
            .filter_map(|face| match self.store.load_image(&face.path) {
                Ok(image) => Some(Reference {
                    path: face.path,
                    image: Arc::new(image),
                }),
                Err(e) => {
                    log::debug!("skipping unreadable reference: {e}");
                    None
                }
            })
            .collect();
        self.references.insert(identity.to_string(), loaded);
    }
}
