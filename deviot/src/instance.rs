//! Handlers behind registered things.
//!
//! An [`Instance`] declares its actions on the [`Thing`] it is registered as,
//! and registers one operation per action in its [`Operations`] table. Each
//! operation is an ordinary function taking `&mut Self` followed by its
//! parameters, in the same order as the action's parameter list:
//!
//! ```ignore
//! impl Instance for Lamp {
//!     fn init(&mut self, thing: &mut Thing, ops: &mut Operations<Self>) {
//!         thing.add_action(Action::new("setOn").with_parameter(Property::bool("on")));
//!         ops.add("setOn", Lamp::set_on);
//!     }
//! }
//! ```
//!
//! Parameter types implement [`Param`], which converts the JSON value found in
//! the command envelope. A trailing [`Payload`] parameter receives the
//! envelope's `payload` field untouched; register those with
//! [`Operations::add_with_payload`].

use std::collections::BTreeMap;

use compact_str::CompactString;
use deviot_common::Thing;
use serde_json::Value;

pub trait Instance: Send + 'static {
    /// Capability label reported to the management server.
    ///
    /// Defaults to the lower-cased type name without its module path.
    fn kind(&self) -> CompactString {
        default_kind(core::any::type_name::<Self>())
    }

    /// Called once at registration, before the thing becomes visible.
    fn init(&mut self, thing: &mut Thing, ops: &mut Operations<Self>)
    where
        Self: Sized;
}

pub(crate) fn default_kind(type_name: &str) -> CompactString {
    let path = type_name.split('<').next().unwrap_or(type_name);
    let name = path.rsplit("::").next().unwrap_or(path);
    name.to_lowercase().into()
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("expected type: {expected}, got {actual}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub actual: &'static str,
}

impl ConversionError {
    fn new(expected: &'static str, value: &Value) -> Self {
        Self { expected, actual: json_type(value) }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A type an operation parameter can be bound to.
///
/// Commands arrive as JSON, so every number is seen as an `f64`; integer
/// targets truncate.
pub trait Param: Sized + Default {
    const EXPECTED: &'static str;

    fn coerce(value: &Value) -> Result<Self, ConversionError>;

    /// Binds a value from the envelope or the parameter's default, or the zero
    /// value when neither exists.
    fn bind(value: Option<&Value>) -> Result<Self, ConversionError> {
        match value {
            Some(value) => Self::coerce(value),
            None => Ok(Self::default()),
        }
    }
}

macro_rules! numeric_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Param for $ty {
                const EXPECTED: &'static str = stringify!($ty);

                fn coerce(value: &Value) -> Result<Self, ConversionError> {
                    match value {
                        Value::Number(n) => n
                            .as_f64()
                            .map(|n| n as $ty)
                            .ok_or_else(|| ConversionError::new(Self::EXPECTED, value)),
                        _ => Err(ConversionError::new(Self::EXPECTED, value)),
                    }
                }
            }
        )*
    };
}

numeric_param!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Param for bool {
    const EXPECTED: &'static str = "bool";

    fn coerce(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(b) => Ok(*b),
            _ => Err(ConversionError::new(Self::EXPECTED, value)),
        }
    }
}

impl Param for String {
    const EXPECTED: &'static str = "string";

    fn coerce(value: &Value) -> Result<Self, ConversionError> {
        Ok(match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => match n.as_f64() {
                Some(f) if n.is_f64() => format_float(f),
                _ => n.to_string(),
            },
            other => other.to_string(),
        })
    }
}

impl Param for CompactString {
    const EXPECTED: &'static str = "string";

    fn coerce(value: &Value) -> Result<Self, ConversionError> {
        String::coerce(value).map(CompactString::from)
    }
}

/// Shortest text that reads back as `f`, switching to exponent form
/// (`1e+06`, `1.5e-07`) below 1e-4 and from 1e6 up. `7.0` reads as `"7"`.
fn format_float(f: f64) -> String {
    let sci = format!("{f:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return f.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return f.to_string();
    };

    if (-4..6).contains(&exp) {
        f.to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
    }
}

/// Raw `payload` field of a command envelope, `Null` when absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(pub Value);

type Call<I> =
    Box<dyn Fn(&mut I, &[Option<&Value>], Option<&Value>) -> Result<(), ConversionError> + Send + Sync>;

pub struct Operation<I> {
    params: usize,
    payload: bool,
    call: Call<I>,
}

impl<I> Operation<I> {
    /// Number of positional parameters, not counting a trailing payload.
    pub fn params(&self) -> usize {
        self.params
    }

    pub fn takes_payload(&self) -> bool {
        self.payload
    }

    /// Binds every argument first, so a conversion failure leaves the instance
    /// untouched.
    pub(crate) fn call(
        &self,
        instance: &mut I,
        args: &[Option<&Value>],
        payload: Option<&Value>,
    ) -> Result<(), ConversionError> {
        (self.call)(instance, args, payload)
    }
}

pub trait IntoOperation<I, M> {
    fn into_operation(self) -> Operation<I>;
}

pub trait IntoPayloadOperation<I, M> {
    fn into_operation(self) -> Operation<I>;
}

macro_rules! one {
    ($ty:ident) => {
        1
    };
}

macro_rules! into_operation {
    ($($ty:ident),*) => {
        impl<I, F, $($ty,)*> IntoOperation<I, ($($ty,)*)> for F
        where
            I: 'static,
            F: Fn(&mut I, $($ty,)*) + Send + Sync + 'static,
            $($ty: Param + 'static,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_operation(self) -> Operation<I> {
                Operation {
                    params: 0 $(+ one!($ty))*,
                    payload: false,
                    call: Box::new(move |instance: &mut I, args: &[Option<&Value>], _: Option<&Value>| {
                        let mut args = args.iter().copied();
                        $(let $ty = $ty::bind(args.next().flatten())?;)*
                        (self)(instance, $($ty,)*);
                        Ok(())
                    }),
                }
            }
        }

        impl<I, F, $($ty,)*> IntoPayloadOperation<I, ($($ty,)*)> for F
        where
            I: 'static,
            F: Fn(&mut I, $($ty,)* Payload) + Send + Sync + 'static,
            $($ty: Param + 'static,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_operation(self) -> Operation<I> {
                Operation {
                    params: 0 $(+ one!($ty))*,
                    payload: true,
                    call: Box::new(move |instance: &mut I, args: &[Option<&Value>], payload: Option<&Value>| {
                        let mut args = args.iter().copied();
                        $(let $ty = $ty::bind(args.next().flatten())?;)*
                        let payload = Payload(payload.cloned().unwrap_or(Value::Null));
                        (self)(instance, $($ty,)* payload);
                        Ok(())
                    }),
                }
            }
        }
    };
}

into_operation!();
into_operation!(A1);
into_operation!(A1, A2);
into_operation!(A1, A2, A3);
into_operation!(A1, A2, A3, A4);
into_operation!(A1, A2, A3, A4, A5);
into_operation!(A1, A2, A3, A4, A5, A6);
into_operation!(A1, A2, A3, A4, A5, A6, A7);
into_operation!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Operations an instance exposes, by action name.
pub struct Operations<I> {
    ops: BTreeMap<CompactString, Operation<I>>,
}

impl<I> Default for Operations<I> {
    fn default() -> Self {
        Self { ops: BTreeMap::new() }
    }
}

impl<I> Operations<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `op` under `name`, replacing any earlier operation of that name.
    pub fn add<M>(&mut self, name: impl Into<CompactString>, op: impl IntoOperation<I, M>) -> &mut Self {
        self.ops.insert(name.into(), op.into_operation());
        self
    }

    /// Like [`add`](Self::add), for operations whose last parameter is the raw
    /// [`Payload`].
    pub fn add_with_payload<M>(
        &mut self,
        name: impl Into<CompactString>,
        op: impl IntoPayloadOperation<I, M>,
    ) -> &mut Self {
        self.ops.insert(name.into(), op.into_operation());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Operation<I>> {
        self.ops.get(name)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
