use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles INFO. Only the replication section is populated; it is also
/// what a sectionless INFO answers with.
pub async fn info(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    match args {
        [] => (),
        [section] if section.eq_ignore_ascii_case("replication") => (),
        [section] => return Err(CommandError::UnknownInfoSection(section.clone())),
        _ => return Err(CommandError::WrongNumberOfArguments("info".to_string())),
    }

    Ok(RespValue::BulkString(ctx.replication.info_section()))
}
