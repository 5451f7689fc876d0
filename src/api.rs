use crate::{error::Error, message::Partition};

pub mod errors;
pub mod messages;
pub mod migration;
pub mod sources;

fn parse_partition(raw: &str) -> Result<Partition, Error> {
    raw.parse().map_err(|_| {
        Error::invalid_parameter(format!(
            "unknown partition {raw:?}, expected one of queue, archive, error"
        ))
    })
}
