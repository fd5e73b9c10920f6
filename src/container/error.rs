use std::fmt;

#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err(ContainerError::new($msg))
    };
    (($msg:literal), ($context:literal)) => {
        return Err(ContainerError::with_context(ContainerError::new($msg), $context.to_string()))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(ContainerError::new(&format!($fmtstr, $($args)*)))
    };
    (($fmtstr:literal, $($args:tt)*), ($context:literal)) => {
        return Err(ContainerError::with_context(ContainerError::new(&format!($fmtstr, $($args)*)), $context.to_string()))
    };
    (($fmtstr:literal, $($args:tt)*), ($contextfmt:literal, $($contextargs:tt)*)) => {
        return Err(ContainerError::with_context(ContainerError::new(&format!($fmtstr, $($args)*)), format!($contextfmt, $($contextargs)*)))
    };
}

#[derive(Debug, PartialEq, Eq)]
pub struct ContainerError
{
    msg: String,
    contexts: Vec<String>,
}

impl ContainerError
{
    pub(crate) fn new(msg: &str) -> Self
    {
        ContainerError {
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: ContainerError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        ContainerError { msg: base.msg, contexts }
    }
}

impl fmt::Display for ContainerError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for ContainerError {}
