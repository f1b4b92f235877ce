use crate::accel::DispatchError;

/// Sequential reference loop on the calling thread.
///
/// Runs strictly in input order. This is the last tier of every dispatch, so
/// errors and panics are not caught here: they belong to the caller.
pub fn map_sequential<I, A, O, E, F>(
    function: &F,
    inputs: &[I],
    extra: &A,
) -> Result<Vec<O>, DispatchError>
where
    A: ?Sized,
    E: Into<anyhow::Error>,
    F: Fn(&I, &A) -> Result<O, E>,
{
    let mut outputs = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let value = function(input, extra).map_err(|e| DispatchError::Function {
            index,
            source: e.into(),
        })?;
        outputs.push(value);
    }
    Ok(outputs)
}
