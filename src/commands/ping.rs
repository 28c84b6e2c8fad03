use crate::commands::CommandError;
use crate::resp::RespValue;

pub fn ping(args: &[String]) -> Result<RespValue, CommandError> {
    if !args.is_empty() {
        return Err(CommandError::WrongNumberOfArguments("ping".to_string()));
    }

    Ok(RespValue::SimpleString("PONG".to_string()))
}
