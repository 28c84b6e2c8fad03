use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Parsed arguments for XADD: `XADD key id field value [field value …]`.
struct XaddArguments {
    key: String,
    id_spec: String,
    fields: Vec<(String, String)>,
}

impl XaddArguments {
    fn parse(args: &[String]) -> Result<Self, CommandError> {
        let [key, id_spec, pairs @ ..] = args else {
            return Err(CommandError::WrongNumberOfArguments("xadd".to_string()));
        };

        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(CommandError::WrongNumberOfArguments("xadd".to_string()));
        }

        Ok(XaddArguments {
            key: key.clone(),
            id_spec: id_spec.clone(),
            fields: pairs
                .chunks(2)
                .map(|chunk| (chunk[0].clone(), chunk[1].clone()))
                .collect(),
        })
    }
}

/// Handles XADD: appends an entry to the stream (creating it when the key
/// is unbound) and answers with the resolved id.
pub async fn xadd(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let xadd_arguments = XaddArguments::parse(args)?;

    let id = ctx
        .keyspace
        .xadd(
            &xadd_arguments.key,
            &xadd_arguments.id_spec,
            xadd_arguments.fields,
        )
        .await?;

    Ok(RespValue::BulkString(id))
}
