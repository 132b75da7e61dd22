//! Request repository trait definition.
//!
//! Covers endpoints, examples and the content families attached to an
//! example: key/value rows, the raw body and assertions.

use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::request::{
    Assertion, AssertionCascade, BodyRaw, Endpoint, Example, KeyValue, KvFamily,
};

/// Repository trait for request templates and their content.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RequestRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Endpoints and examples
    // -----------------------------------------------------------------------

    fn create_endpoint(
        &self,
        endpoint: &Endpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_endpoint(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<Endpoint>, RepositoryError>> + Send;

    fn list_endpoints(
        &self,
        collection_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Endpoint>, RepositoryError>> + Send;

    fn create_example(
        &self,
        example: &Example,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_example(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<Example>, RepositoryError>> + Send;

    fn list_examples(
        &self,
        endpoint_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Example>, RepositoryError>> + Send;

    /// Examples whose version parent is `origin_id`.
    fn list_delta_examples(
        &self,
        origin_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Example>, RepositoryError>> + Send;

    /// Copy an example's header row under a new id and name.
    ///
    /// Attached content families are not copied.
    fn duplicate_example(
        &self,
        id: &Id,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Example, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Key/value families
    // -----------------------------------------------------------------------

    /// Insert a row and link it at `position` (tail when `None`).
    fn create_key_value(
        &self,
        row: &KeyValue,
        position: Option<usize>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_key_value(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<KeyValue>, RepositoryError>> + Send;

    /// Rows of one family of an example, head to tail.
    fn list_key_values(
        &self,
        example_id: &Id,
        family: KvFamily,
    ) -> impl std::future::Future<Output = Result<Vec<KeyValue>, RepositoryError>> + Send;

    /// Update values, overrides and delta parent (never links).
    fn update_key_value(
        &self,
        row: &KeyValue,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Unlink and delete a row. Returns `true` if it existed.
    fn delete_key_value(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Raw body
    // -----------------------------------------------------------------------

    fn get_body_raw(
        &self,
        example_id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<BodyRaw>, RepositoryError>> + Send;

    fn upsert_body_raw(
        &self,
        body: &BodyRaw,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Assertions
    // -----------------------------------------------------------------------

    fn create_assertion(
        &self,
        assertion: &Assertion,
        position: Option<usize>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_assertion(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<Assertion>, RepositoryError>> + Send;

    /// Assertions of an example, head to tail.
    fn list_assertions(
        &self,
        example_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Assertion>, RepositoryError>> + Send;

    /// Every assertion in any example whose delta parent is `parent_id`.
    fn list_assertions_by_parent(
        &self,
        parent_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Assertion>, RepositoryError>> + Send;

    /// Update expression, enabled flag and delta parent (never links).
    fn update_assertion(
        &self,
        assertion: &Assertion,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn delete_assertion(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Apply an origin assertion edit and its delta copies in one transaction.
    fn apply_assertion_cascade(
        &self,
        cascade: &AssertionCascade,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
