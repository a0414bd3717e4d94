use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::worker::{DeliveryCapabilities, GeoPoint, WorkerProfile};

use super::DispatchService;

#[derive(Debug, Clone)]
pub struct RegisterWorkerParams {
    pub name: String,
    pub location: GeoPoint,
    pub capabilities: DeliveryCapabilities,
}

impl DispatchService {
    /// Registers a worker offline; presence is an explicit toggle.
    pub fn register_worker(
        &self,
        params: RegisterWorkerParams,
    ) -> Result<WorkerProfile, DispatchError> {
        if params.name.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "worker name cannot be empty".to_string(),
            ));
        }
        if params.capabilities.max_weight_kg < 0.0 {
            return Err(DispatchError::InvalidRequest(
                "max weight cannot be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let worker = WorkerProfile {
            id: Uuid::new_v4(),
            name: params.name,
            online: false,
            available: false,
            location: params.location,
            located_at: now,
            capabilities: params.capabilities,
            rating: 0.0,
            total_ratings: 0,
            updated_at: now,
        };
        self.state.workers.insert(worker.id, worker.clone());
        info!(worker_id = %worker.id, name = %worker.name, "worker registered");

        Ok(worker)
    }

    /// Presence toggle. Going offline always clears availability; coming
    /// online restores it unless the worker is still engaged on an active
    /// request.
    pub fn set_online(&self, worker_id: Uuid, online: bool) -> Result<WorkerProfile, DispatchError> {
        let engaged = self.worker_is_engaged(worker_id);

        let mut worker = self
            .state
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| DispatchError::NotFound(format!("worker {worker_id} not found")))?;
        worker.online = online;
        worker.available = online && !engaged;
        worker.updated_at = Utc::now();
        let updated = worker.clone();
        drop(worker);

        self.state.refresh_worker_gauge();
        Ok(updated)
    }

    /// Explicit availability toggle for an online worker who wants to stop
    /// receiving offers without going offline.
    pub fn set_available(
        &self,
        worker_id: Uuid,
        available: bool,
    ) -> Result<WorkerProfile, DispatchError> {
        let engaged = available && self.worker_is_engaged(worker_id);

        let mut worker = self
            .state
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| DispatchError::NotFound(format!("worker {worker_id} not found")))?;
        if available && !worker.online {
            return Err(DispatchError::WorkerUnavailable);
        }
        if engaged {
            return Err(DispatchError::WorkerUnavailable);
        }
        worker.available = available;
        worker.updated_at = Utc::now();
        let updated = worker.clone();
        drop(worker);

        self.state.refresh_worker_gauge();
        Ok(updated)
    }

    pub fn update_location(
        &self,
        worker_id: Uuid,
        location: GeoPoint,
    ) -> Result<WorkerProfile, DispatchError> {
        let mut worker = self
            .state
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| DispatchError::NotFound(format!("worker {worker_id} not found")))?;
        worker.location = location;
        worker.located_at = Utc::now();
        worker.updated_at = worker.located_at;
        Ok(worker.clone())
    }

    /// Availability is owned by lifecycle transitions and the presence
    /// toggles above; this check keeps the toggles from marking a worker
    /// available while a request still references them.
    pub(crate) fn worker_is_engaged(&self, worker_id: Uuid) -> bool {
        self.state
            .requests
            .iter()
            .any(|entry| entry.worker_id == Some(worker_id) && entry.status.is_active())
    }
}
