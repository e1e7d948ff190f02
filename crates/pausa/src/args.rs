use crate::{
    exception::{RunError, RunResult},
    value::Value,
};

/// Evaluated arguments of a call: positional values then keyword values by name.
#[derive(Debug, Default)]
pub(crate) struct ArgValues {
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl ArgValues {
    pub fn new(args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Self { args, kwargs }
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    /// Removes a keyword argument by name.
    pub fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        let idx = self.kwargs.iter().position(|(k, _)| k == name)?;
        Some(self.kwargs.remove(idx).1)
    }

    /// Fails if any keyword arguments remain unconsumed.
    pub fn check_no_kwargs(&self, name: &str) -> RunResult<()> {
        match self.kwargs.first() {
            None => Ok(()),
            Some((key, _)) => Err(RunError::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            ))),
        }
    }

    pub fn check_zero_args(self, name: &str) -> RunResult<()> {
        self.check_no_kwargs(name)?;
        if self.args.is_empty() {
            Ok(())
        } else {
            Err(RunError::type_error(format!(
                "{name}() takes no arguments ({} given)",
                self.args.len()
            )))
        }
    }

    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        let [a] = self.exact::<1>(name)?;
        Ok(a)
    }

    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        let [a, b] = self.exact::<2>(name)?;
        Ok((a, b))
    }

    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        let mut args = self.between(name, 0, 1)?;
        Ok(args.pop())
    }

    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        let mut args = self.between(name, 1, 2)?.into_iter();
        match (args.next(), args.next()) {
            (Some(a), b) => Ok((a, b)),
            (None, _) => Err(RunError::type_error(format!("{name}() expected at least 1 argument, got 0"))),
        }
    }

    /// Positional arguments, checking their count is within `min..=max` and no keywords remain.
    pub fn between(self, name: &str, min: usize, max: usize) -> RunResult<Vec<Value>> {
        self.check_no_kwargs(name)?;
        let count = self.args.len();
        if count < min {
            Err(RunError::type_error(format!(
                "{name}() expected at least {min} argument{}, got {count}",
                plural(min)
            )))
        } else if count > max {
            Err(RunError::type_error(format!(
                "{name}() expected at most {max} argument{}, got {count}",
                plural(max)
            )))
        } else {
            Ok(self.args)
        }
    }

    fn exact<const N: usize>(self, name: &str) -> RunResult<[Value; N]> {
        self.check_no_kwargs(name)?;
        let count = self.args.len();
        self.args.try_into().map_err(|_| {
            RunError::type_error(format!(
                "{name}() takes exactly {N} argument{} ({count} given)",
                plural(N)
            ))
        })
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
