use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

pub fn config_get(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let [subcommand, parameters @ ..] = args else {
        return Err(CommandError::WrongNumberOfArguments("config".to_string()));
    };

    if !subcommand.eq_ignore_ascii_case("get") || parameters.is_empty() {
        return Err(CommandError::SyntaxError);
    }

    let mut response = Vec::with_capacity(parameters.len() * 2);

    for parameter in parameters {
        let value = match parameter.as_str() {
            "dir" => ctx.config.dir.clone(),
            "dbfilename" => ctx.config.dbfilename.clone(),
            unknown => return Err(CommandError::UnknownConfigParameter(unknown.to_string())),
        };

        response.push(RespValue::BulkString(parameter.clone()));
        response.push(RespValue::BulkString(value));
    }

    Ok(RespValue::Array(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::test_context_with_config;

    #[tokio::test]
    async fn test_config_get() {
        let ctx = test_context_with_config(&[
            "--dir",
            "/data",
            "--dbfilename",
            "state.rdb",
        ])
        .await;

        assert_eq!(
            config_get(&ctx, &["GET".to_string(), "dir".to_string()]),
            Ok(RespValue::Array(vec![
                RespValue::BulkString("dir".to_string()),
                RespValue::BulkString("/data".to_string()),
            ]))
        );
        assert_eq!(
            config_get(&ctx, &["get".to_string(), "dbfilename".to_string()]),
            Ok(RespValue::Array(vec![
                RespValue::BulkString("dbfilename".to_string()),
                RespValue::BulkString("state.rdb".to_string()),
            ]))
        );
        assert_eq!(
            config_get(&ctx, &["get".to_string(), "maxmemory".to_string()]),
            Err(CommandError::UnknownConfigParameter("maxmemory".to_string()))
        );
        assert!(config_get(&ctx, &["set".to_string(), "dir".to_string()]).is_err());
    }
}
