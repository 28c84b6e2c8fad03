use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;
use crate::store::now_unix_ms;

/// Parsed arguments for SET: `SET key value [PX milliseconds]`.
struct SetArguments {
    key: String,
    value: String,
    /// Absolute expiry in Unix milliseconds, 0 when no PX was given.
    expires_at_unix_ms: i64,
}

impl SetArguments {
    fn parse(args: &[String]) -> Result<Self, CommandError> {
        let (key, value) = match args {
            [key, value] | [key, value, _, _] => (key.clone(), value.clone()),
            _ => return Err(CommandError::WrongNumberOfArguments("set".to_string())),
        };

        let expires_at_unix_ms = match args {
            [_, _, option, duration] => {
                if !option.eq_ignore_ascii_case("px") {
                    return Err(CommandError::SyntaxError);
                }

                let millis = duration
                    .parse::<i64>()
                    .map_err(|_| CommandError::InvalidExpireTime)?;

                if millis <= 0 {
                    return Err(CommandError::InvalidExpireTime);
                }

                now_unix_ms() + millis
            }
            _ => 0,
        };

        Ok(SetArguments {
            key,
            value,
            expires_at_unix_ms,
        })
    }
}

/// Handles SET. `PX ms` stores an absolute expiry of `now + ms`; reads
/// past that point observe the key as absent.
pub async fn set(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let set_arguments = SetArguments::parse(args)?;

    ctx.keyspace
        .write(
            &set_arguments.key,
            set_arguments.value,
            set_arguments.expires_at_unix_ms,
        )
        .await;

    Ok(RespValue::SimpleString("OK".to_string()))
}
