use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    config::AppConfig, ingest::IndexingPipeline, models::IndexingReport, rag::RagPipeline,
    vector_store::VectorIndex,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<RagPipeline>,
    pub indexer: Arc<IndexingPipeline>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub status: Arc<Mutex<Status>>,
}

/// Estado de la indexación expuesto en `/api/status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<IndexingReport>,
}

impl Status {
    pub fn ready() -> Self {
        Self {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            last_report: None,
        }
    }
}

pub fn lock_status(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marca la indexación como en curso mientras vive. Al soltarse (también si
/// la tarea que lo posee termina con pánico) deja `is_busy = false`.
pub struct BusyGuard {
    status: Arc<Mutex<Status>>,
}

impl BusyGuard {
    /// `None` si ya hay una indexación en curso.
    pub fn acquire(status: &Arc<Mutex<Status>>, message: &str) -> Option<Self> {
        let mut current = lock_status(status);
        if current.is_busy {
            return None;
        }
        current.is_busy = true;
        current.message = message.to_string();
        Some(Self {
            status: status.clone(),
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        lock_status(&self.status).is_busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_guard_is_exclusive_and_released_on_drop() {
        let status = Arc::new(Mutex::new(Status::ready()));

        let guard = BusyGuard::acquire(&status, "Indexando...").unwrap();
        assert!(lock_status(&status).is_busy);
        assert_eq!(lock_status(&status).message, "Indexando...");
        assert!(BusyGuard::acquire(&status, "otra").is_none());

        drop(guard);
        assert!(!lock_status(&status).is_busy);
        assert!(BusyGuard::acquire(&status, "de nuevo").is_some());
    }

    #[test]
    fn busy_flag_is_released_when_the_owner_panics() {
        let status = Arc::new(Mutex::new(Status::ready()));
        let shared = status.clone();

        let outcome = std::thread::spawn(move || {
            let _guard = BusyGuard::acquire(&shared, "Indexando...").unwrap();
            panic!("fallo durante la indexación");
        })
        .join();

        assert!(outcome.is_err());
        assert!(!lock_status(&status).is_busy);
    }
}
