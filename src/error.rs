use crate::heap::HeapRef;
use std::fmt::Display;

/// Errors surfaced by the VM. Two channels, strictly separated:
///
/// * `Thrown` / `Java` carry a VM-level throwable and participate in bytecode
///   exception tables. `Java` is the lazy form; it is materialized into an
///   instance at the first catch boundary and becomes `Thrown`.
/// * `Panic` marks impossible states (layout inconsistencies, unreachable
///   dispatch arms). It is never caught by bytecode and escalates to the
///   embedder.
#[derive(Debug)]
pub enum VmError {
    /// An already-materialized throwable instance in VM heap memory.
    Thrown(HeapRef),
    /// A throwable that has not been materialized yet.
    Java(JavaThrowable),
    Panic(String),
}

impl Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::Thrown(oop) => write!(f, "vm exception at {oop:#x}"),
            VmError::Java(throwable) => {
                write!(f, "{}", throwable.kind.class_name_dot())?;
                if let Some(message) = &throwable.message {
                    write!(f, ": {message}")?;
                }
                Ok(())
            }
            VmError::Panic(message) => write!(f, "vm panic: {message}"),
        }
    }
}

impl From<JavaThrowable> for VmError {
    fn from(value: JavaThrowable) -> Self {
        VmError::Java(value)
    }
}

impl VmError {
    pub fn is_panic(&self) -> bool {
        matches!(self, VmError::Panic(_))
    }
}

/// Exception kinds the VM raises on its own behalf. Each maps to a bootstrap
/// throwable class that is constructed lazily via `<init>()V`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JavaExceptionKind {
    NoClassDefFound,
    ClassNotFound,
    NoSuchMethod,
    NoSuchField,
    ClassCast,
    NullPointer,
    ArrayIndexOutOfBounds,
    NegativeArraySize,
    IllegalArgument,
    IllegalState,
    IllegalMonitorState,
    Arithmetic,
    AbstractMethod,
    UnsatisfiedLink,
    BootstrapMethod,
    ExceptionInInitializer,
    OutOfMemory,
    StackOverflow,
    Interrupted,
}

impl JavaExceptionKind {
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::NoClassDefFound => "java/lang/NoClassDefFoundError",
            Self::ClassNotFound => "java/lang/ClassNotFoundException",
            Self::NoSuchMethod => "java/lang/NoSuchMethodError",
            Self::NoSuchField => "java/lang/NoSuchFieldError",
            Self::ClassCast => "java/lang/ClassCastException",
            Self::NullPointer => "java/lang/NullPointerException",
            Self::ArrayIndexOutOfBounds => "java/lang/ArrayIndexOutOfBoundsException",
            Self::NegativeArraySize => "java/lang/NegativeArraySizeException",
            Self::IllegalArgument => "java/lang/IllegalArgumentException",
            Self::IllegalState => "java/lang/IllegalStateException",
            Self::IllegalMonitorState => "java/lang/IllegalMonitorStateException",
            Self::Arithmetic => "java/lang/ArithmeticException",
            Self::AbstractMethod => "java/lang/AbstractMethodError",
            Self::UnsatisfiedLink => "java/lang/UnsatisfiedLinkError",
            Self::BootstrapMethod => "java/lang/BootstrapMethodError",
            Self::ExceptionInInitializer => "java/lang/ExceptionInInitializerError",
            Self::OutOfMemory => "java/lang/OutOfMemoryError",
            Self::StackOverflow => "java/lang/StackOverflowError",
            Self::Interrupted => "java/lang/InterruptedException",
        }
    }

    pub fn class_name_dot(self) -> String {
        self.class_name().replace('/', ".")
    }
}

/// A pending VM exception: kind, optional detail message, optional cause.
/// The cause is an already-materialized instance so it can survive the trip
/// through the initialization state machine.
#[derive(Debug, Clone)]
pub struct JavaThrowable {
    pub kind: JavaExceptionKind,
    pub message: Option<String>,
    pub cause: Option<HeapRef>,
}

impl JavaThrowable {
    pub fn new(kind: JavaExceptionKind) -> Self {
        Self {
            kind,
            message: None,
            cause: None,
        }
    }

    pub fn with_message(kind: JavaExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            cause: None,
        }
    }

    pub fn with_cause(kind: JavaExceptionKind, message: Option<String>, cause: HeapRef) -> Self {
        Self {
            kind,
            message,
            cause: Some(cause),
        }
    }
}

/// Builds a `VmError::Java` value for the given kind, optionally with a
/// formatted detail message.
#[macro_export]
macro_rules! build_exception {
    ($kind:ident) => {
        $crate::error::VmError::Java($crate::error::JavaThrowable::new(
            $crate::error::JavaExceptionKind::$kind,
        ))
    };
    ($kind:ident, $($arg:tt)+) => {
        $crate::error::VmError::Java($crate::error::JavaThrowable::with_message(
            $crate::error::JavaExceptionKind::$kind,
            format!($($arg)+),
        ))
    };
}

/// `return Err(...)`-shaped companion of [`build_exception!`]. Usable both in
/// tail position and with `?`.
#[macro_export]
macro_rules! throw_exception {
    ($kind:ident) => {
        Err($crate::build_exception!($kind))
    };
    ($kind:ident, $($arg:tt)+) => {
        Err($crate::build_exception!($kind, $($arg)+))
    };
}
