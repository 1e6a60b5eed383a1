//! The memory manager. Objects and arrays live in one `mmap`-ed region;
//! every allocation is headered, zero-initialized and addressed by its byte
//! offset into the region. Field and element accesses go through typed
//! reads/writes at byte offsets computed by the class layouts; the engine is
//! responsible for only passing layout-produced offsets.

use crate::descriptor::AllocationType;
use crate::error::VmError;
use crate::keys::ClassId;
use crate::vm::Value;
use crate::{build_exception, throw_exception};
use std::num::NonZeroU32;

pub mod method_area;

/// Handle to an allocated object: the byte offset of its header within the
/// heap region. Offset 0 is reserved and acts as the canonical null.
pub type HeapRef = usize;

pub const NULL_REF: HeapRef = 0;

#[repr(C)]
pub struct ObjectHeader {
    /// Total bytes, header included.
    size: u32,
    class_id: NonZeroU32,
    is_array: bool,
    _padding: [u8; 7],
}

impl ObjectHeader {
    const SIZE: usize = size_of::<ObjectHeader>();

    pub fn is_array(&self) -> bool {
        self.is_array
    }
}

pub struct Heap {
    memory: *mut u8,
    capacity: usize,
    allocated: usize,
}

// Safety: the raw region pointer is only dereferenced through &self/&mut self
// methods; the VM wraps the heap in an RwLock.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub const OBJECT_HEADER_SIZE: usize = ObjectHeader::SIZE;
    pub const ARRAY_LENGTH_OFFSET: usize = 0;
    pub const ARRAY_KIND_OFFSET: usize = 4;
    pub const ARRAY_ELEMENTS_OFFSET: usize = 8;

    pub fn new(size_mb: usize) -> Result<Self, VmError> {
        let capacity = size_mb * 1024 * 1024;

        let memory = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };

        if memory == libc::MAP_FAILED {
            return Err(VmError::Panic("mmap failed".to_string()));
        }

        Ok(Heap {
            memory: memory as *mut u8,
            capacity,
            // Offset 0 is the null handle; skip one header so no object can
            // ever be handed out at it.
            allocated: ObjectHeader::SIZE,
        })
    }

    fn alloc_raw(&mut self, size: usize) -> Result<HeapRef, VmError> {
        let total_needed = ObjectHeader::SIZE + size;

        // align to 8 bytes
        let aligned_total = (total_needed + 7) & !7;

        if self.allocated + aligned_total > self.capacity {
            return Err(build_exception!(
                OutOfMemory,
                "heap region exhausted ({} bytes)",
                self.capacity
            ));
        }

        let offset = self.allocated;
        self.allocated += aligned_total;

        let data_ptr = unsafe { self.data_ptr(offset) };
        unsafe {
            std::ptr::write_bytes(data_ptr, 0, size);
        }

        Ok(offset)
    }

    fn header_mut(&mut self, heap_ref: HeapRef) -> &mut ObjectHeader {
        unsafe { &mut *(self.memory.add(heap_ref) as *mut ObjectHeader) }
    }

    pub fn header(&self, heap_ref: HeapRef) -> &ObjectHeader {
        unsafe { &*(self.memory.add(heap_ref) as *const ObjectHeader) }
    }

    unsafe fn data_ptr(&self, heap_ref: HeapRef) -> *mut u8 {
        unsafe { self.memory.add(heap_ref + ObjectHeader::SIZE) }
    }

    pub fn is_array(&self, heap_ref: HeapRef) -> bool {
        self.header(heap_ref).is_array()
    }

    pub fn class_id(&self, heap_ref: HeapRef) -> ClassId {
        ClassId::new(self.header(heap_ref).class_id)
    }

    /// Allocates a zeroed instance sized for the class's virtual layout (or a
    /// class mirror sized for `Class` plus its static region).
    pub fn alloc_instance(
        &mut self,
        instance_size: usize,
        class_id: ClassId,
    ) -> Result<HeapRef, VmError> {
        let heap_ref = self.alloc_raw(instance_size)?;

        let header = self.header_mut(heap_ref);
        header.class_id = class_id.into_inner();
        header.size = (ObjectHeader::SIZE + instance_size) as u32;
        header.is_array = false;

        Ok(heap_ref)
    }

    /// Allocates a zeroed array of `length` elements of the given kind. The
    /// header records length and element kind; elements start at
    /// [`Self::ARRAY_ELEMENTS_OFFSET`].
    pub fn alloc_array(
        &mut self,
        class_id: ClassId,
        kind: AllocationType,
        length: i32,
    ) -> Result<HeapRef, VmError> {
        if length < 0 {
            return Err(VmError::Panic(format!(
                "array allocation with unchecked negative length {length}"
            )));
        }

        let element_size = kind.byte_size();
        let array_data_size = Self::ARRAY_ELEMENTS_OFFSET + (length as usize * element_size);
        let heap_ref = self.alloc_raw(array_data_size)?;

        let header = self.header_mut(heap_ref);
        header.class_id = class_id.into_inner();
        header.size = (ObjectHeader::SIZE + array_data_size) as u32;
        header.is_array = true;

        let data_ptr = unsafe { self.data_ptr(heap_ref) };
        unsafe {
            *(data_ptr as *mut i32) = length;
            *(data_ptr.add(Self::ARRAY_KIND_OFFSET)) = kind as u8;
        }

        Ok(heap_ref)
    }

    pub fn array_length(&self, heap_ref: HeapRef) -> Result<i32, VmError> {
        self.check_is_array(heap_ref)?;
        let data_ptr = unsafe { self.data_ptr(heap_ref) };
        Ok(unsafe { *(data_ptr as *const i32) })
    }

    pub fn array_kind(&self, heap_ref: HeapRef) -> Result<AllocationType, VmError> {
        self.check_is_array(heap_ref)?;
        let data_ptr = unsafe { self.data_ptr(heap_ref) };
        let kind_byte = unsafe { *(data_ptr.add(Self::ARRAY_KIND_OFFSET)) };
        AllocationType::try_from(kind_byte)
            .map_err(|_| VmError::Panic(format!("corrupt array kind byte {kind_byte}")))
    }

    /// Bytes per element for arrays of the given kind.
    pub fn array_index_scale(kind: AllocationType) -> usize {
        kind.byte_size()
    }

    /// Byte offset of an object's field data from the start of its header.
    /// Field offsets passed to the typed accessors are relative to this.
    pub const fn value_base_offset() -> usize {
        ObjectHeader::SIZE
    }

    fn check_is_array(&self, heap_ref: HeapRef) -> Result<(), VmError> {
        if !self.is_array(heap_ref) {
            return Err(VmError::Panic(format!(
                "object at {heap_ref:#x} is not an array"
            )));
        }
        Ok(())
    }

    pub fn write_array_element(
        &mut self,
        heap_ref: HeapRef,
        index: i32,
        value: Value,
    ) -> Result<(), VmError> {
        let length = self.array_length(heap_ref)?;
        if index < 0 || index >= length {
            throw_exception!(
                ArrayIndexOutOfBounds,
                "Index {} out of bounds for length {}",
                index,
                length
            )?
        }

        let kind = self.array_kind(heap_ref)?;
        let field_offset = Self::ARRAY_ELEMENTS_OFFSET + (index as usize * kind.byte_size());

        self.write_field(heap_ref, field_offset, value, kind)
    }

    pub fn read_array_element(&self, heap_ref: HeapRef, index: i32) -> Result<Value, VmError> {
        let length = self.array_length(heap_ref)?;
        if index < 0 || index >= length {
            throw_exception!(
                ArrayIndexOutOfBounds,
                "Index {} out of bounds for length {}",
                index,
                length
            )?
        }

        let kind = self.array_kind(heap_ref)?;
        let field_offset = Self::ARRAY_ELEMENTS_OFFSET + (index as usize * kind.byte_size());

        self.read_field(heap_ref, field_offset, kind)
    }

    /// Writes a value at a byte offset within the object's data region,
    /// narrowing it to the field's storage kind. Offsets outside the region
    /// are undefined; callers must use layout-produced offsets.
    pub fn write_field(
        &mut self,
        heap_ref: HeapRef,
        field_offset: usize,
        value: Value,
        field_type: AllocationType,
    ) -> Result<(), VmError> {
        let data_ptr = unsafe { self.data_ptr(heap_ref) };
        let target_ptr = unsafe { data_ptr.add(field_offset) };

        match (value, field_type) {
            (Value::Integer(i), AllocationType::Boolean) => unsafe {
                *target_ptr = if i != 0 { 1 } else { 0 };
            },
            (Value::Integer(i), AllocationType::Byte) => unsafe {
                *(target_ptr as *mut i8) = i as i8;
            },
            (Value::Integer(i), AllocationType::Short) => unsafe {
                *(target_ptr as *mut i16) = i as i16;
            },
            (Value::Integer(i), AllocationType::Char) => unsafe {
                *(target_ptr as *mut u16) = i as u16;
            },
            (Value::Integer(i), AllocationType::Int) => unsafe {
                *(target_ptr as *mut i32) = i;
            },
            (Value::Long(l), AllocationType::Long) => unsafe {
                *(target_ptr as *mut i64) = l;
            },
            (Value::Float(f), AllocationType::Float) => unsafe {
                *(target_ptr as *mut f32) = f;
            },
            (Value::Double(d), AllocationType::Double) => unsafe {
                *(target_ptr as *mut f64) = d;
            },
            (Value::Ref(r), AllocationType::Reference) => unsafe {
                *(target_ptr as *mut HeapRef) = r;
            },
            (Value::Null, AllocationType::Reference) => unsafe {
                *(target_ptr as *mut HeapRef) = NULL_REF;
            },
            (value, field_type) => {
                return Err(VmError::Panic(format!(
                    "type mismatch writing {value:?} as {field_type:?}"
                )));
            }
        }
        Ok(())
    }

    /// Reads a value at a byte offset within the object's data region,
    /// widening sub-int kinds to int as the operand stack requires.
    pub fn read_field(
        &self,
        heap_ref: HeapRef,
        field_offset: usize,
        field_type: AllocationType,
    ) -> Result<Value, VmError> {
        let data_ptr = unsafe { self.data_ptr(heap_ref) };
        let source_ptr = unsafe { data_ptr.add(field_offset) };

        let value = match field_type {
            AllocationType::Boolean => {
                let byte_val = unsafe { *source_ptr };
                Value::Integer(if byte_val != 0 { 1 } else { 0 })
            }
            AllocationType::Byte => Value::Integer(unsafe { *(source_ptr as *const i8) } as i32),
            AllocationType::Short => Value::Integer(unsafe { *(source_ptr as *const i16) } as i32),
            AllocationType::Char => Value::Integer(unsafe { *(source_ptr as *const u16) } as i32),
            AllocationType::Int => Value::Integer(unsafe { *(source_ptr as *const i32) }),
            AllocationType::Long => Value::Long(unsafe { *(source_ptr as *const i64) }),
            AllocationType::Float => Value::Float(unsafe { *(source_ptr as *const f32) }),
            AllocationType::Double => Value::Double(unsafe { *(source_ptr as *const f64) }),
            AllocationType::Reference => {
                let ref_val = unsafe { *(source_ptr as *const HeapRef) };
                if ref_val == NULL_REF {
                    Value::Null
                } else {
                    Value::Ref(ref_val)
                }
            }
        };
        Ok(value)
    }

    /// `System.arraycopy` for primitive and reference arrays of matching kind.
    pub fn copy_array_slice(
        &mut self,
        src: HeapRef,
        src_pos: i32,
        dest: HeapRef,
        dest_pos: i32,
        length: i32,
    ) -> Result<(), VmError> {
        let kind = self.array_kind(src)?;
        let dest_kind = self.array_kind(dest)?;
        if kind != dest_kind {
            throw_exception!(
                IllegalArgument,
                "source and destination array kinds differ"
            )?;
        }

        let src_len = self.array_length(src)?;
        let dest_len = self.array_length(dest)?;
        if src_pos < 0
            || dest_pos < 0
            || length < 0
            || src_pos.checked_add(length).is_none_or(|end| end > src_len)
            || dest_pos
                .checked_add(length)
                .is_none_or(|end| end > dest_len)
        {
            throw_exception!(
                ArrayIndexOutOfBounds,
                "copy of length {} from {} to {} out of bounds",
                length,
                src_pos,
                dest_pos
            )?;
        }

        let element_size = kind.byte_size();
        let src_data_ptr = unsafe { self.data_ptr(src) };
        let dest_data_ptr = unsafe { self.data_ptr(dest) };

        let src_ptr = unsafe {
            src_data_ptr.add(Self::ARRAY_ELEMENTS_OFFSET + src_pos as usize * element_size)
        };
        let dest_ptr = unsafe {
            dest_data_ptr.add(Self::ARRAY_ELEMENTS_OFFSET + dest_pos as usize * element_size)
        };

        unsafe {
            std::ptr::copy(src_ptr, dest_ptr, length as usize * element_size);
        }

        Ok(())
    }

    /// Shallow copy of an object or array, preserving the class header.
    pub fn clone_object(&mut self, src: HeapRef) -> Result<HeapRef, VmError> {
        let (class_id, data_size, is_array) = {
            let src_header = self.header(src);
            (
                src_header.class_id,
                src_header.size as usize - ObjectHeader::SIZE,
                src_header.is_array,
            )
        };

        let dest = self.alloc_raw(data_size)?;

        let src_data_ptr = unsafe { self.data_ptr(src) };
        let dest_data_ptr = unsafe { self.data_ptr(dest) };

        unsafe {
            std::ptr::copy_nonoverlapping(src_data_ptr, dest_data_ptr, data_size);
        }

        let dest_header = self.header_mut(dest);
        dest_header.class_id = class_id;
        dest_header.size = (ObjectHeader::SIZE + data_size) as u32;
        dest_header.is_array = is_array;

        Ok(dest)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.memory as *mut libc::c_void, self.capacity) };
        if result != 0 {
            tracing::warn!("munmap failed during heap drop");
        }
    }
}
