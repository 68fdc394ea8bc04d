//! Owner of every live `Person` and `Face`.
//!
//! Faces point back at their person by id. Removing a person removes
//! every face that points at it in the same call.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::detection::domain::person_tracker::{TrackId, TrackedPerson};
use crate::recognition::domain::feature_descriptors::FaceDescriptors;
use crate::registry::face::{Face, FaceId, FaceObservation};
use crate::registry::person::Person;
use crate::shared::bbox::BBox;
use crate::shared::constants::UNKNOWN_NAME;

pub type SharedRegistry = Arc<Mutex<EntityRegistry>>;

/// Locks the registry, recovering the data if a holder panicked.
pub fn lock(registry: &Mutex<EntityRegistry>) -> MutexGuard<'_, EntityRegistry> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// What the face sub-pipeline needs to know about a face it may re-match.
#[derive(Clone, Debug)]
pub struct KnownFace {
    pub face_id: FaceId,
    pub bbox: BBox,
    pub descriptors: Option<FaceDescriptors>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FaceView {
    pub face_id: FaceId,
    pub name: String,
    pub bbox: BBox,
    pub confidence: f64,
    pub distance: f64,
}

/// Read-only copy of a person and its linked faces for display.
#[derive(Clone, Debug, PartialEq)]
pub struct PersonView {
    pub id: TrackId,
    pub bbox: BBox,
    pub confidence: f64,
    pub last_seen: Instant,
    pub has_embedding: bool,
    pub faces: Vec<FaceView>,
}

impl PersonView {
    /// Name of the best-recognized face, or "Unknown".
    pub fn primary_face_name(&self) -> &str {
        self.faces
            .iter()
            .min_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|f| f.name.as_str())
            .unwrap_or(UNKNOWN_NAME)
    }
}

/// Ids removed by one eviction pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Eviction {
    pub persons: Vec<TrackId>,
    pub faces: Vec<FaceId>,
}

impl Eviction {
    pub fn is_empty(&self) -> bool {
        self.persons.is_empty() && self.faces.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct EntityRegistry {
    persons: HashMap<TrackId, Person>,
    faces: HashMap<FaceId, Face>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn person(&self, id: TrackId) -> Option<&Person> {
        self.persons.get(&id)
    }

    pub fn face(&self, id: FaceId) -> Option<&Face> {
        self.faces.get(&id)
    }

    pub fn person_count(&self) -> usize {
        self.persons.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Updates the person for `track`, creating it on first sight.
    /// Returns `true` when a new person was created.
    pub fn observe_person(&mut self, track: &TrackedPerson, now: Instant) -> bool {
        match self.persons.get_mut(&track.track_id) {
            Some(person) => {
                person.update(track, now);
                false
            }
            None => {
                self.persons
                    .insert(track.track_id, Person::new(track, now));
                true
            }
        }
    }

    /// Stores a person's first embedding. Returns `false` when the person
    /// is gone or already has one.
    pub fn set_feature_vector(&mut self, id: TrackId, vector: Vec<f32>) -> bool {
        self.persons
            .get_mut(&id)
            .is_some_and(|p| p.set_feature_vector(vector))
    }

    /// Faces previously linked to `person_id`, ordered by id.
    pub fn known_faces(&self, person_id: TrackId) -> Vec<KnownFace> {
        let mut known: Vec<KnownFace> = self
            .faces
            .values()
            .filter(|f| f.person_id == Some(person_id))
            .map(|f| KnownFace {
                face_id: f.face_id,
                bbox: f.bbox,
                descriptors: f.descriptors().cloned(),
            })
            .collect();
        known.sort_by_key(|k| k.face_id);
        known
    }

    /// Creates or updates the observed faces and makes them the person's
    /// current face set. Returns the linked ids.
    ///
    /// Observations for a person no longer in the registry are dropped so
    /// no face is ever left pointing at a missing person.
    pub fn apply_face_observations(
        &mut self,
        person_id: TrackId,
        observations: Vec<FaceObservation>,
        now: Instant,
    ) -> Vec<FaceId> {
        if !self.persons.contains_key(&person_id) {
            return Vec::new();
        }

        let mut linked = Vec::with_capacity(observations.len());
        for observation in observations {
            let id = observation.face_id;
            match self.faces.get_mut(&id) {
                Some(face) => {
                    if let Some(previous) = face.person_id.filter(|p| *p != person_id) {
                        if let Some(owner) = self.persons.get_mut(&previous) {
                            owner.unlink_face(id);
                        }
                    }
                    face.person_id = Some(person_id);
                    face.update(observation, now);
                }
                None => {
                    self.faces.insert(id, Face::new(observation, person_id, now));
                }
            }
            linked.push(id);
        }

        if let Some(person) = self.persons.get_mut(&person_id) {
            person.replace_faces(linked.iter().copied());
        }
        linked
    }

    /// Removes persons missing from `current` and unseen for longer than
    /// `window`, along with all of their faces.
    pub fn evict(
        &mut self,
        current: &HashSet<TrackId>,
        now: Instant,
        window: Duration,
    ) -> Eviction {
        let mut stale: Vec<TrackId> = self
            .persons
            .values()
            .filter(|p| !current.contains(&p.id))
            .filter(|p| now.saturating_duration_since(p.last_seen()) > window)
            .map(|p| p.id)
            .collect();
        if stale.is_empty() {
            return Eviction::default();
        }
        stale.sort_unstable();

        for id in &stale {
            self.persons.remove(id);
        }
        let mut faces: Vec<FaceId> = self
            .faces
            .values()
            .filter(|f| f.person_id.is_some_and(|p| stale.contains(&p)))
            .map(|f| f.face_id)
            .collect();
        faces.sort_unstable();
        for id in &faces {
            self.faces.remove(id);
        }

        Eviction {
            persons: stale,
            faces,
        }
    }

    /// Every person with its linked faces, ordered by id.
    pub fn snapshot(&self) -> Vec<PersonView> {
        let mut views: Vec<PersonView> = self
            .persons
            .values()
            .map(|p| PersonView {
                id: p.id,
                bbox: p.bbox,
                confidence: p.confidence,
                last_seen: p.last_seen(),
                has_embedding: p.feature_vector().is_some(),
                faces: p
                    .face_ids()
                    .iter()
                    .filter_map(|id| self.faces.get(id))
                    .map(|f| FaceView {
                        face_id: f.face_id,
                        name: f.name.clone(),
                        bbox: f.bbox,
                        confidence: f.confidence,
                        distance: f.distance,
                    })
                    .collect(),
            })
            .collect();
        views.sort_by_key(|v| v.id);
        views
    }

    /// Faces whose `person_id` names no live person. Empty while the
    /// registry is consistent.
    pub fn check_links(&self) -> Vec<FaceId> {
        let mut broken: Vec<FaceId> = self
            .faces
            .values()
            .filter(|f| f.person_id.is_some_and(|p| !self.persons.contains_key(&p)))
            .map(|f| f.face_id)
            .collect();
        broken.sort_unstable();
        broken
    }
}
