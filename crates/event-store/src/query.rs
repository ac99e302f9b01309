use crate::DomainEventRecord;

/// Composite predicate over domain event records.
///
/// Used for idempotency checks (aggregate type, optional aggregate id,
/// command type, command id) and for finding records owed a redelivery.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Filter by aggregate type.
    pub aggregate_type: Option<String>,

    /// Filter by aggregate id (string form).
    pub aggregate_id: Option<String>,

    /// Filter by command type.
    pub command_type: Option<String>,

    /// Filter by command id.
    pub command_id: Option<String>,

    /// Filter by published flag.
    pub published: Option<bool>,

    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl RecordQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the idempotency predicate for a command.
    ///
    /// `aggregate_id` is `None` for commands that create their aggregate.
    pub fn idempotency_key(
        aggregate_type: impl Into<String>,
        aggregate_id: Option<String>,
        command_type: impl Into<String>,
        command_id: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_type: Some(aggregate_type.into()),
            aggregate_id,
            command_type: Some(command_type.into()),
            command_id: Some(command_id.into()),
            ..Default::default()
        }
    }

    /// Creates a query for records whose delivery never succeeded.
    pub fn unpublished() -> Self {
        Self {
            published: Some(false),
            ..Default::default()
        }
    }

    /// Filters by aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Filters by aggregate id.
    pub fn aggregate_id(mut self, aggregate_id: impl ToString) -> Self {
        self.aggregate_id = Some(aggregate_id.to_string());
        self
    }

    /// Filters by command type.
    pub fn command_type(mut self, command_type: impl Into<String>) -> Self {
        self.command_type = Some(command_type.into());
        self
    }

    /// Filters by command id.
    pub fn command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record satisfies every set filter.
    pub fn matches(&self, record: &DomainEventRecord) -> bool {
        if let Some(ref aggregate_type) = self.aggregate_type
            && &record.aggregate_type != aggregate_type
        {
            return false;
        }
        if let Some(ref aggregate_id) = self.aggregate_id
            && &record.aggregate_id != aggregate_id
        {
            return false;
        }
        if let Some(ref command_type) = self.command_type
            && &record.command_type != command_type
        {
            return false;
        }
        if let Some(ref command_id) = self.command_id
            && record.command_id() != command_id
        {
            return false;
        }
        if let Some(published) = self.published
            && record.published != published
        {
            return false;
        }
        true
    }
}
