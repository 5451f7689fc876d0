use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use crate::{
    error::Error,
    message::{Message, Partition},
    utils::to_millis,
};

use super::{
    message::{select_from, MessageRow},
    MessageStore,
};

pub const MAX_PAGE_SIZE: u32 = 1000;

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Exact state name; see [`Partition::states`]
    pub state: Option<String>,
    /// Case-sensitive substring matched against the payload, and for errors also the
    /// error type and details
    pub query: Option<String>,
    /// Exact source name
    pub source: Option<String>,
    /// Exact error type; only meaningful for the error partition
    pub error_type: Option<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            state: None,
            query: None,
            source: None,
            error_type: None,
            offset: 0,
            limit: default_limit(),
        }
    }
}

impl SearchFilter {
    pub fn page(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    fn validate(&self, partition: Partition) -> Result<(), Error> {
        if !(1..=MAX_PAGE_SIZE).contains(&self.limit) {
            return Err(Error::invalid_parameter(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if let Some(state) = &self.state {
            if !partition.states().contains(&state.as_str()) {
                return Err(Error::invalid_parameter(format!(
                    "state {state:?} does not exist in the {partition} partition"
                )));
            }
        }
        if self.error_type.is_some() && partition != Partition::Error {
            return Err(Error::invalid_parameter(
                "error_type can only filter the error partition",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total: u64,
}

fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    partition: Partition,
    filter: &SearchFilter,
    now: i64,
) {
    qb.push(" WHERE 1 = 1");

    match (partition, filter.state.as_deref()) {
        (Partition::Queue, Some("pending")) => {
            qb.push(" AND (m.claim_expires_at IS NULL OR m.claim_expires_at <= ")
                .push_bind(now)
                .push(")");
        }
        (Partition::Queue, Some("claimed")) => {
            qb.push(" AND m.claim_expires_at > ").push_bind(now);
        }
        // Archive and error partitions hold a single state each.
        _ => {}
    }

    if let Some(source) = &filter.source {
        qb.push(" AND s.name = ").push_bind(source.clone());
    }

    if let Some(error_type) = &filter.error_type {
        qb.push(" AND m.error_type = ").push_bind(error_type.clone());
    }

    // instr() compares bytes, unlike LIKE which folds ASCII case.
    if let Some(query) = filter.query.as_ref().filter(|q| !q.is_empty()) {
        qb.push(" AND (instr(m.payload, ")
            .push_bind(query.as_bytes().to_vec())
            .push(") > 0");

        if partition == Partition::Error {
            qb.push(" OR instr(m.error_type, ")
                .push_bind(query.clone())
                .push(") > 0 OR instr(m.error_details, ")
                .push_bind(query.clone())
                .push(") > 0");
        }

        qb.push(")");
    }
}

impl MessageStore {
    /// Filtered, paginated search over one partition, ordered oldest first.
    ///
    /// `total` counts every match regardless of `offset` and `limit`.
    pub async fn search(
        &self,
        partition: Partition,
        filter: &SearchFilter,
    ) -> Result<Page<Message>, Error> {
        filter.validate(partition)?;

        let now = to_millis(chrono::Utc::now());

        let mut count = QueryBuilder::<Sqlite>::new(format!(
            "SELECT COUNT(*) FROM {} m JOIN sources s ON s.id = m.source",
            partition.table()
        ));
        push_filters(&mut count, partition, filter, now);

        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut select = QueryBuilder::<Sqlite>::new(select_from(partition));
        push_filters(&mut select, partition, filter, now);
        select
            .push(" ORDER BY m.date_created ASC, m.id ASC LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let rows: Vec<MessageRow> = select.build_query_as().fetch_all(&self.db).await?;

        let records = rows
            .into_iter()
            .map(|row| row.into_message(partition))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            records,
            total: total as u64,
        })
    }
}
