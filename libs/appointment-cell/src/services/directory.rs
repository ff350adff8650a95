// libs/appointment-cell/src/services/directory.rs
use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{DoctorProfile, Hospital, PatientContact};
use crate::services::store::StoreError;

/// Read-only lookups for the people and places an appointment refers to.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn doctor(&self, doctor_id: Uuid) -> Result<Option<DoctorProfile>, StoreError>;

    async fn doctor_for_user(&self, user_id: Uuid) -> Result<Option<DoctorProfile>, StoreError>;

    async fn hospital(&self, hospital_id: Uuid) -> Result<Option<Hospital>, StoreError>;

    async fn patient(&self, patient_id: Uuid) -> Result<Option<PatientContact>, StoreError>;
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub doctors: Vec<DoctorProfile>,
    #[serde(default)]
    pub hospitals: Vec<Hospital>,
    #[serde(default)]
    pub patients: Vec<PatientContact>,
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    doctors: RwLock<HashMap<Uuid, DoctorProfile>>,
    hospitals: RwLock<HashMap<Uuid, Hospital>>,
    patients: RwLock<HashMap<Uuid, PatientContact>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        info!(
            "Loading directory: {} doctors, {} hospitals, {} patients",
            seed.doctors.len(),
            seed.hospitals.len(),
            seed.patients.len()
        );
        Self {
            doctors: RwLock::new(seed.doctors.into_iter().map(|d| (d.id, d)).collect()),
            hospitals: RwLock::new(seed.hospitals.into_iter().map(|h| (h.id, h)).collect()),
            patients: RwLock::new(seed.patients.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let seed: DirectorySeed = serde_json::from_str(raw)?;
        Ok(Self::from_seed(seed))
    }

    pub async fn insert_doctor(&self, doctor: DoctorProfile) {
        self.doctors.write().await.insert(doctor.id, doctor);
    }

    pub async fn insert_hospital(&self, hospital: Hospital) {
        self.hospitals.write().await.insert(hospital.id, hospital);
    }

    pub async fn insert_patient(&self, patient: PatientContact) {
        self.patients.write().await.insert(patient.id, patient);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn doctor(&self, doctor_id: Uuid) -> Result<Option<DoctorProfile>, StoreError> {
        Ok(self.doctors.read().await.get(&doctor_id).cloned())
    }

    async fn doctor_for_user(&self, user_id: Uuid) -> Result<Option<DoctorProfile>, StoreError> {
        Ok(self
            .doctors
            .read()
            .await
            .values()
            .find(|d| d.user_id == user_id)
            .cloned())
    }

    async fn hospital(&self, hospital_id: Uuid) -> Result<Option<Hospital>, StoreError> {
        Ok(self.hospitals.read().await.get(&hospital_id).cloned())
    }

    async fn patient(&self, patient_id: Uuid) -> Result<Option<PatientContact>, StoreError> {
        Ok(self.patients.read().await.get(&patient_id).cloned())
    }
}
