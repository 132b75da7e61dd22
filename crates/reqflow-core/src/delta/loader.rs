//! Loading example content from storage and resolving it.

use reqflow_types::flow::RequestRef;
use reqflow_types::id::Id;
use reqflow_types::request::KvFamily;

use super::DeltaError;
use super::resolver::{ExampleContent, ResolvedRequest, resolve};
use crate::repository::request::RequestRepository;

/// Read everything stored for one example.
pub async fn load_content<R: RequestRepository>(
    repo: &R,
    example_id: &Id,
) -> Result<ExampleContent, DeltaError> {
    let example = repo
        .get_example(example_id)
        .await?
        .ok_or(DeltaError::NotFound {
            entity: "example",
            id: *example_id,
        })?;
    let endpoint = repo
        .get_endpoint(&example.endpoint_id)
        .await?
        .ok_or(DeltaError::NotFound {
            entity: "endpoint",
            id: example.endpoint_id,
        })?;

    let mut key_values = Vec::new();
    for family in KvFamily::ALL {
        key_values.extend(repo.list_key_values(example_id, family).await?);
    }

    Ok(ExampleContent {
        endpoint,
        example,
        key_values,
        body_raw: repo.get_body_raw(example_id).await?,
        assertions: repo.list_assertions(example_id).await?,
    })
}

/// Resolve an example, optionally through a delta example.
///
/// `delta_endpoint_id` selects the endpoint whose scalar overrides apply;
/// by default that is the delta example's own endpoint.
pub async fn load_resolved<R: RequestRepository>(
    repo: &R,
    example_id: &Id,
    delta_example_id: Option<&Id>,
    delta_endpoint_id: Option<&Id>,
) -> Result<ResolvedRequest, DeltaError> {
    let base = load_content(repo, example_id).await?;

    let delta = match delta_example_id {
        Some(id) => {
            let mut content = load_content(repo, id).await?;
            let related = content.endpoint.id == base.endpoint.id
                || content.endpoint.delta_parent_id == Some(base.endpoint.id);
            if !related {
                return Err(DeltaError::ForeignExample {
                    delta: *id,
                    endpoint: base.endpoint.id,
                });
            }
            if let Some(ep_id) = delta_endpoint_id {
                content.endpoint = repo.get_endpoint(ep_id).await?.ok_or(DeltaError::NotFound {
                    entity: "endpoint",
                    id: *ep_id,
                })?;
            }
            Some(content)
        }
        None => None,
    };

    tracing::debug!(
        example_id = %example_id,
        delta = delta.is_some(),
        "resolving request"
    );
    Ok(resolve(base, delta)?)
}

/// Resolve the request a flow node points at.
pub async fn load_for_ref<R: RequestRepository>(
    repo: &R,
    reference: &RequestRef,
) -> Result<ResolvedRequest, DeltaError> {
    load_resolved(
        repo,
        &reference.example_id,
        reference.delta_example_id.as_ref(),
        reference.delta_endpoint_id.as_ref(),
    )
    .await
}
