use crate::error::Result;
use crate::value::bind::{BindSource, BindValue};
use crate::value::encode::number::{Number, number_binary, number_text};
use crate::value::encode::{EncodeContext, ValueEncoder};

/// `bool`, sent as 0 or 1 for numeric targets
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanEncoder;

fn as_number(bind: &BindValue) -> Result<Number> {
    match bind.source {
        BindSource::Bool(b) => Ok(Number::Integer(i128::from(b))),
        _ => Err(bind.type_mismatch()),
    }
}

impl ValueEncoder for BooleanEncoder {
    fn encode_as_text(&self, bind: &BindValue, _ctx: &EncodeContext) -> Result<Vec<u8>> {
        number_text(as_number(bind)?, bind)
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        _ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        number_binary(as_number(bind)?, bind, out)
    }
}
