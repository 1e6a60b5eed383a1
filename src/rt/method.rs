use crate::descriptor::MethodDescriptor;
use crate::error::VmError;
use crate::keys::{ClassId, Symbol};
use crate::node::{self, ExceptionTableEntry, MethodNode};
use crate::throw_exception;

pub struct CodeBody {
    pub code: Box<[u8]>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub exception_table: Vec<ExceptionTableEntry>,
}

pub enum MethodBody {
    Interpreted(CodeBody),
    Native,
    Abstract,
}

pub struct Method {
    class_id: ClassId,
    pub name: Symbol,
    pub desc: Symbol,
    descriptor: MethodDescriptor,
    flags: u16,
    body: MethodBody,
}

impl Method {
    pub fn new(
        node: &MethodNode,
        class_id: ClassId,
        name: Symbol,
        desc: Symbol,
    ) -> Result<Self, VmError> {
        let flags = node.access_flags;
        let body = if node.is_abstract() {
            MethodBody::Abstract
        } else if node.is_native() {
            MethodBody::Native
        } else {
            MethodBody::Interpreted(CodeBody {
                code: node.code.clone().into_boxed_slice(),
                max_stack: node.max_stack,
                max_locals: node.max_locals,
                exception_table: node.exception_table.clone(),
            })
        };
        Ok(Method {
            class_id,
            name,
            desc,
            descriptor: MethodDescriptor::parse(&node.descriptor)?,
            flags,
            body,
        })
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn is_static(&self) -> bool {
        self.flags & node::ACC_STATIC != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.flags & node::ACC_ABSTRACT != 0
    }

    pub fn is_native(&self) -> bool {
        self.flags & node::ACC_NATIVE != 0
    }

    /// Number of popped argument values, receiver included for instance
    /// methods.
    pub fn invocation_arg_count(&self) -> usize {
        let mut count = self.descriptor.param_count();
        if !self.is_static() {
            count += 1;
        }
        count
    }

    pub fn frame_attributes(&self) -> Result<(u16, u16), VmError> {
        match &self.body {
            MethodBody::Interpreted(code_body) => Ok((code_body.max_stack, code_body.max_locals)),
            _ => throw_exception!(IllegalState, "method has no code"),
        }
    }

    pub fn exception_table(&self) -> Result<&[ExceptionTableEntry], VmError> {
        match &self.body {
            MethodBody::Interpreted(code_body) => Ok(&code_body.exception_table),
            _ => throw_exception!(IllegalState, "method has no code"),
        }
    }

    pub fn code(&self) -> Result<&[u8], VmError> {
        match &self.body {
            MethodBody::Interpreted(code_body) => Ok(&code_body.code),
            _ => throw_exception!(IllegalState, "method has no code"),
        }
    }
}
