//! Idempotent check-then-create

use crate::cluster::ObjectRef;
use crate::error::{ClusterError, ProvisionError};
use std::future::Future;

/// Identifies the object whose existence gates a creation action
pub type ResourceSpec = ObjectRef;

/// What [`ensure`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    /// Found before creation, or created concurrently by someone else
    AlreadyPresent,
    Created,
}

/// Run `create` unless `exists` reports the object is already there
///
/// A `NotFound` error from the existence check counts as "absent"; any
/// other check failure is returned without calling `create`. An
/// `AlreadyExists` error from `create` means a concurrent run won the race.
pub async fn ensure<E, EFut, C, CFut>(
    spec: &ResourceSpec,
    exists: E,
    create: C,
) -> Result<Ensured, ProvisionError>
where
    E: FnOnce() -> EFut,
    EFut: Future<Output = Result<bool, ClusterError>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<(), ClusterError>>,
{
    match exists().await {
        Ok(true) => {
            tracing::info!("{} already exists, skipping", spec);
            return Ok(Ensured::AlreadyPresent);
        }
        Ok(false) | Err(ClusterError::NotFound(_)) => {}
        Err(source) => {
            return Err(ProvisionError::ExistenceCheck {
                kind: spec.kind.to_string(),
                namespace: spec.namespace.clone(),
                name: spec.name.clone(),
                source,
            });
        }
    }

    match create().await {
        Ok(()) => {
            tracing::info!("Created {}", spec);
            Ok(Ensured::Created)
        }
        Err(ClusterError::AlreadyExists(_)) => {
            tracing::info!("{} was created concurrently, skipping", spec);
            Ok(Ensured::AlreadyPresent)
        }
        Err(source) => Err(ProvisionError::Create {
            kind: spec.kind.to_string(),
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ObjectKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    async fn never_create() -> Result<(), ClusterError> {
        panic!("create must not run")
    }

    fn spec() -> ResourceSpec {
        ObjectRef::new(ObjectKind::Secret, "kcm-system", "aws-secret")
    }

    #[tokio::test]
    async fn test_second_ensure_creates_nothing() {
        let present = Arc::new(AtomicBool::new(false));
        let creates = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let exists = {
                let present = present.clone();
                move || async move { Ok::<_, ClusterError>(present.load(Ordering::SeqCst)) }
            };
            let create = {
                let present = present.clone();
                let creates = creates.clone();
                move || async move {
                    creates.fetch_add(1, Ordering::SeqCst);
                    present.store(true, Ordering::SeqCst);
                    Ok::<_, ClusterError>(())
                }
            };
            ensure(&spec(), exists, create).await.unwrap();
        }

        assert_eq!(creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_object_skips_create() {
        let result = ensure(
            &spec(),
            || async { Ok::<_, ClusterError>(true) },
            never_create,
        )
        .await;
        assert_eq!(result, Ok(Ensured::AlreadyPresent));
    }

    #[tokio::test]
    async fn test_not_found_error_means_absent() {
        let result = ensure(
            &spec(),
            || async { Err::<bool, _>(ClusterError::NotFound("secret".to_string())) },
            || async { Ok::<_, ClusterError>(()) },
        )
        .await;
        assert_eq!(result, Ok(Ensured::Created));
    }

    #[tokio::test]
    async fn test_check_failure_is_propagated_without_create() {
        let result = ensure(
            &spec(),
            || async { Err::<bool, _>(ClusterError::Api("connection refused".to_string())) },
            never_create,
        )
        .await;
        assert!(matches!(result, Err(ProvisionError::ExistenceCheck { .. })));
    }

    #[tokio::test]
    async fn test_create_failure_is_wrapped() {
        let err = ensure(
            &spec(),
            || async { Ok::<_, ClusterError>(false) },
            || async { Err::<(), _>(ClusterError::Api("forbidden".to_string())) },
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to create Secret kcm-system/aws-secret: API error: forbidden"
        );
    }

    #[tokio::test]
    async fn test_concurrent_creation_counts_as_present() {
        let result = ensure(
            &spec(),
            || async { Ok::<_, ClusterError>(false) },
            || async { Err::<(), _>(ClusterError::AlreadyExists("secret".to_string())) },
        )
        .await;
        assert_eq!(result, Ok(Ensured::AlreadyPresent));
    }
}
