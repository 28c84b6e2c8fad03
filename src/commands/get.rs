use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;
use crate::store::StoreError;

struct GetArguments {
    key: String,
}

impl GetArguments {
    fn parse(args: &[String]) -> Result<Self, CommandError> {
        let [key] = args else {
            return Err(CommandError::WrongNumberOfArguments("get".to_string()));
        };

        Ok(GetArguments { key: key.clone() })
    }
}

/// Handles GET: the record's string value, or the null bulk string when
/// the key is missing or expired.
pub async fn get(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let get_arguments = GetArguments::parse(args)?;

    let Some(record) = ctx.keyspace.read(&get_arguments.key).await else {
        return Ok(RespValue::NullBulkString);
    };

    let Some(value) = record.as_string() else {
        return Err(CommandError::Store(StoreError::WrongType));
    };

    Ok(RespValue::BulkString(value.to_string()))
}
