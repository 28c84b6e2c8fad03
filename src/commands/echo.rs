use crate::commands::CommandError;
use crate::resp::RespValue;

pub fn echo(args: &[String]) -> Result<RespValue, CommandError> {
    let [message] = args else {
        return Err(CommandError::WrongNumberOfArguments("echo".to_string()));
    };

    Ok(RespValue::BulkString(message.clone()))
}
