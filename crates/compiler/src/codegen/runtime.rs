//! Runtime ABI surface of the emitted C.
//!
//! Everything the emitted translation unit assumes about the runtime
//! lives here in one place: the core typedefs (thread context,
//! function objects, frame header, built-in object shapes) and a
//! single data-driven table of runtime entry points, each paired with
//! the stack-frame record the entry reads at `ctx->stack_pointer`.
//!
//! Keeping the declarations in one table (instead of scattered
//! `writeln!` calls) is what keeps the emitted prologue and the
//! hand-written runtime in agreement.

use std::fmt::Write as _;
use std::sync::LazyLock;

use super::error::CodeGenError;

/// Core prologue: headers and the shapes shared by all emitted code.
/// Forward declarations only ever refer to earlier lines, so this
/// text can be emitted verbatim at the top of the translation unit.
pub const PROLOGUE: &str = r#"#include <assert.h>
#include <complex.h>
#include <stdbool.h>
#include <stddef.h>
#include <stdint.h>
#include <stdio.h>
#include <string.h>

struct LightWeightThreadContext;
typedef struct FunctionObject FunctionObject;
typedef FunctionObject (*UserFunction)(struct LightWeightThreadContext* ctx);
struct FunctionObject {
    UserFunction func_ptr;
    void* free_vars;
};

struct LightWeightThreadContext {
    void* global_context;
    void* stack_pointer;
    FunctionObject prev_func;
    intptr_t marker;
};
typedef struct LightWeightThreadContext LightWeightThreadContext;

typedef struct BoolObject { bool raw; } BoolObject;
typedef struct IntObject { intptr_t raw; } IntObject;
typedef struct Int8Object { int8_t raw; } Int8Object;
typedef struct Int16Object { int16_t raw; } Int16Object;
typedef struct Int32Object { int32_t raw; } Int32Object;
typedef struct Int64Object { int64_t raw; } Int64Object;
typedef struct UintObject { uintptr_t raw; } UintObject;
typedef struct Uint8Object { uint8_t raw; } Uint8Object;
typedef struct Uint16Object { uint16_t raw; } Uint16Object;
typedef struct Uint32Object { uint32_t raw; } Uint32Object;
typedef struct Uint64Object { uint64_t raw; } Uint64Object;
typedef struct UintptrObject { uintptr_t raw; } UintptrObject;
typedef struct Float32Object { float raw; } Float32Object;
typedef struct Float64Object { double raw; } Float64Object;
typedef struct Complex64Object { float _Complex raw; } Complex64Object;
typedef struct Complex128Object { double _Complex raw; } Complex128Object;
typedef struct StringObject { const char* raw; } StringObject;
typedef struct UnsafePointerObject { void* raw; } UnsafePointerObject;

typedef struct ChannelObject ChannelObject;
typedef struct MapObject MapObject;
typedef struct SliceObject { void* ptr; size_t size; size_t capacity; } SliceObject;
typedef struct IterObject { void* collection; uintptr_t count; } IterObject;

typedef bool (*GoxEqualFunc)(const void* lhs, const void* rhs);
typedef uintptr_t (*GoxHashFunc)(const void* obj);

typedef struct InterfaceTableEntry {
    const char* method_name;
    FunctionObject function;
} InterfaceTableEntry;

typedef struct TypeInfo {
    const char* name;
    size_t num_methods;
    const InterfaceTableEntry* interface_table;
    GoxEqualFunc is_equal;
    GoxHashFunc hash;
    size_t size;
} TypeInfo;

typedef struct TypeId { const TypeInfo* info; } TypeId;

typedef struct InterfaceObject {
    void* receiver;
    TypeId type_id;
} InterfaceObject;

typedef struct StackFrameCommon {
    FunctionObject resume_func;
    void* prev_stack_pointer;
    void* free_vars;
    void* defer_head;
} StackFrameCommon;

typedef struct ChannelSelectEntry {
    ChannelObject* channel;
    void* data;
    const TypeInfo* type_id;
    bool is_send;
} ChannelSelectEntry;

uintptr_t gox5_string_hash(const char* s);

static bool gox5_interface_has_method(const TypeInfo* info, const char* method_name) {
    if (info == NULL) {
        return false;
    }
    for (size_t i = 0; i < info->num_methods; i++) {
        if (strcmp(info->interface_table[i].method_name, method_name) == 0) {
            return true;
        }
    }
    return false;
}

static void gox5_print_float64(double v) {
    char buf[40];
    snprintf(buf, sizeof(buf), "%+e", v);
    char* e = strchr(buf, 'e');
    fwrite(buf, 1, (size_t)(e - buf) + 2, stderr);
    const char* digits = e + 2;
    for (size_t n = strlen(digits); n < 3; n++) {
        fputc('0', stderr);
    }
    fputs(digits, stderr);
}

static void gox5_print_complex128(double _Complex v) {
    fputc('(', stderr);
    gox5_print_float64(creal(v));
    gox5_print_float64(cimag(v));
    fputs("i)", stderr);
}
"#;

/// One runtime entry: the frame record the entry reads, and its
/// declaration. `frame` is `None` for plain (non-suspending) helpers
/// declared without a frame.
pub struct RuntimeDecl {
    /// Stack-frame struct source, ending in `};`.
    pub frame: Option<&'static str>,
    /// `FunctionObject gox5_...(LightWeightThreadContext* ctx);`
    pub decl: &'static str,
    /// Optional category comment.
    pub category: Option<&'static str>,
}

/// Every runtime entry the lowerer targets, in prologue order.
pub static RUNTIME_DECLARATIONS: LazyLock<Vec<RuntimeDecl>> = LazyLock::new(|| {
    vec![
        RuntimeDecl {
            frame: Some(
                "struct StackFrameNew {\n    StackFrameCommon common;\n    void** result_ptr;\n    uintptr_t size;\n};",
            ),
            decl: "FunctionObject gox5_new(LightWeightThreadContext* ctx);",
            category: Some("// Heap allocation"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSliceAppend {\n    StackFrameCommon common;\n    SliceObject* result_ptr;\n    const TypeInfo* type_id;\n    SliceObject lhs;\n    SliceObject rhs;\n};",
            ),
            decl: "FunctionObject gox5_slice_append(LightWeightThreadContext* ctx);",
            category: Some("// Slice operations"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSliceAppendString {\n    StackFrameCommon common;\n    SliceObject* result_ptr;\n    SliceObject slice;\n    const char* string;\n};",
            ),
            decl: "FunctionObject gox5_slice_append_string(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSliceCopy {\n    StackFrameCommon common;\n    IntObject* result_ptr;\n    SliceObject dst;\n    SliceObject src;\n};",
            ),
            decl: "FunctionObject gox5_slice_copy(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSliceCopyString {\n    StackFrameCommon common;\n    IntObject* result_ptr;\n    SliceObject dst;\n    const char* src;\n};",
            ),
            decl: "FunctionObject gox5_slice_copy_string(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSliceSize {\n    StackFrameCommon common;\n    IntObject* result_ptr;\n    SliceObject slice;\n};",
            ),
            decl: "FunctionObject gox5_slice_size(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSliceCapacity {\n    StackFrameCommon common;\n    IntObject* result_ptr;\n    SliceObject slice;\n};",
            ),
            decl: "FunctionObject gox5_slice_capacity(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSliceFromString {\n    StackFrameCommon common;\n    SliceObject* result_ptr;\n    const TypeInfo* type_id;\n    const char* src;\n};",
            ),
            decl: "FunctionObject gox5_slice_from_string(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameStringAppend {\n    StackFrameCommon common;\n    const char** result_ptr;\n    const char* lhs;\n    const char* rhs;\n};",
            ),
            decl: "FunctionObject gox5_string_append(LightWeightThreadContext* ctx);",
            category: Some("// String operations"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameStringLength {\n    StackFrameCommon common;\n    IntObject* result_ptr;\n    const char* string;\n};",
            ),
            decl: "FunctionObject gox5_string_length(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameStringSubstr {\n    StackFrameCommon common;\n    const char** result_ptr;\n    const char* base;\n    intptr_t low;\n    intptr_t high;\n};",
            ),
            decl: "FunctionObject gox5_string_substr(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameStringNewFromByteSlice {\n    StackFrameCommon common;\n    const char** result_ptr;\n    SliceObject slice;\n};",
            ),
            decl: "FunctionObject gox5_string_new_from_byte_slice(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameStringNewFromRune {\n    StackFrameCommon common;\n    const char** result_ptr;\n    int32_t rune;\n};",
            ),
            decl: "FunctionObject gox5_string_new_from_rune(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameStringNewFromRuneSlice {\n    StackFrameCommon common;\n    const char** result_ptr;\n    SliceObject slice;\n};",
            ),
            decl: "FunctionObject gox5_string_new_from_rune_slice(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameStringNext {\n    StackFrameCommon common;\n    const char* string;\n    IntObject* index;\n    Int32Object* rune;\n    BoolObject* found;\n    uintptr_t* count;\n};",
            ),
            decl: "FunctionObject gox5_string_next(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameChannelNew {\n    StackFrameCommon common;\n    ChannelObject** result_ptr;\n    const TypeInfo* type_id;\n    intptr_t capacity;\n};",
            ),
            decl: "FunctionObject gox5_channel_new(LightWeightThreadContext* ctx);",
            category: Some("// Channel operations"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameChannelSend {\n    StackFrameCommon common;\n    ChannelObject* channel;\n    void* data;\n    const TypeInfo* type_id;\n};",
            ),
            decl: "FunctionObject gox5_channel_send(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameChannelReceive {\n    StackFrameCommon common;\n    ChannelObject* channel;\n    const TypeInfo* type_id;\n    void* data;\n    BoolObject* available;\n};",
            ),
            decl: "FunctionObject gox5_channel_receive(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameChannelClose {\n    StackFrameCommon common;\n    ChannelObject* channel;\n};",
            ),
            decl: "FunctionObject gox5_channel_close(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameChannelSelect {\n    StackFrameCommon common;\n    IntObject* selected_index;\n    BoolObject* receive_available;\n    bool need_block;\n    uintptr_t entry_count;\n    ChannelSelectEntry entry_buffer[];\n};",
            ),
            decl: "FunctionObject gox5_channel_select(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameMapNew {\n    StackFrameCommon common;\n    MapObject** result_ptr;\n    const TypeInfo* key_type;\n    const TypeInfo* value_type;\n};",
            ),
            decl: "FunctionObject gox5_map_new(LightWeightThreadContext* ctx);",
            category: Some("// Map operations"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameMapGet {\n    StackFrameCommon common;\n    MapObject* map;\n    void* key;\n    void* value;\n    BoolObject* found;\n};",
            ),
            decl: "FunctionObject gox5_map_get(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameMapSet {\n    StackFrameCommon common;\n    MapObject* map;\n    void* key;\n    void* value;\n};",
            ),
            decl: "FunctionObject gox5_map_set(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameMapLen {\n    StackFrameCommon common;\n    IntObject* result_ptr;\n    MapObject* map;\n};",
            ),
            decl: "FunctionObject gox5_map_len(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameMapNext {\n    StackFrameCommon common;\n    MapObject* map;\n    void* key;\n    void* value;\n    BoolObject* found;\n    uintptr_t* count;\n};",
            ),
            decl: "FunctionObject gox5_map_next(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameMakeClosure {\n    StackFrameCommon common;\n    FunctionObject* result_ptr;\n    UserFunction user_function;\n    uintptr_t num_object_ptrs;\n    void* object_ptrs[];\n};",
            ),
            decl: "FunctionObject gox5_make_closure(LightWeightThreadContext* ctx);",
            category: Some("// Closures and interfaces"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameMakeInterface {\n    StackFrameCommon common;\n    InterfaceObject* result_ptr;\n    void* receiver;\n    const TypeInfo* type_id;\n};",
            ),
            decl: "FunctionObject gox5_make_interface(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSearchMethod {\n    StackFrameCommon common;\n    FunctionObject* result_ptr;\n    InterfaceObject interface;\n    const char* method_name;\n};",
            ),
            decl: "FunctionObject gox5_search_method(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameDeferRegister {\n    StackFrameCommon common;\n    FunctionObject function_object;\n    uintptr_t num_arg_buffer_words;\n    void* arg_buffer[];\n};",
            ),
            decl: "FunctionObject gox5_defer_register(LightWeightThreadContext* ctx);",
            category: Some("// Defer, spawn, panic"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameDeferExecute {\n    StackFrameCommon common;\n};",
            ),
            decl: "FunctionObject gox5_defer_execute(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSpawn {\n    StackFrameCommon common;\n    FunctionObject function_object;\n    uintptr_t result_size;\n    uintptr_t num_arg_buffer_words;\n    void* arg_buffer[];\n};",
            ),
            decl: "FunctionObject gox5_spawn(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFramePanicRaise {\n    StackFrameCommon common;\n    InterfaceObject value;\n};",
            ),
            decl: "FunctionObject gox5_panic_raise(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFramePanicRecover {\n    StackFrameCommon common;\n    InterfaceObject* result_ptr;\n};",
            ),
            decl: "FunctionObject gox5_panic_recover(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameComplex64New {\n    StackFrameCommon common;\n    Complex64Object* result_ptr;\n    float real;\n    float imaginary;\n};",
            ),
            decl: "FunctionObject gox5_complex64_new(LightWeightThreadContext* ctx);",
            category: Some("// Complex builtins"),
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameComplex64Real {\n    StackFrameCommon common;\n    Float32Object* result_ptr;\n    float _Complex x;\n};",
            ),
            decl: "FunctionObject gox5_complex64_real(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameComplex64Imaginary {\n    StackFrameCommon common;\n    Float32Object* result_ptr;\n    float _Complex x;\n};",
            ),
            decl: "FunctionObject gox5_complex64_imaginary(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameComplex128New {\n    StackFrameCommon common;\n    Complex128Object* result_ptr;\n    double real;\n    double imaginary;\n};",
            ),
            decl: "FunctionObject gox5_complex128_new(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameComplex128Real {\n    StackFrameCommon common;\n    Float64Object* result_ptr;\n    double _Complex x;\n};",
            ),
            decl: "FunctionObject gox5_complex128_real(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameComplex128Imaginary {\n    StackFrameCommon common;\n    Float64Object* result_ptr;\n    double _Complex x;\n};",
            ),
            decl: "FunctionObject gox5_complex128_imaginary(LightWeightThreadContext* ctx);",
            category: None,
        },
        RuntimeDecl {
            frame: Some(
                "struct StackFrameSchedule {\n    StackFrameCommon common;\n};",
            ),
            decl: "FunctionObject gox5_schedule(LightWeightThreadContext* ctx);",
            category: Some("// Cooperative yield"),
        },
    ]
});

/// Emit the full prologue: core shapes, then every runtime frame and
/// entry declaration.
pub fn emit_prologue(out: &mut String) -> Result<(), CodeGenError> {
    out.push_str(PROLOGUE);
    writeln!(out)?;
    for entry in RUNTIME_DECLARATIONS.iter() {
        if let Some(category) = entry.category {
            writeln!(out, "{category}")?;
        }
        if let Some(frame) = entry.frame {
            writeln!(out, "{frame}")?;
        }
        writeln!(out, "{}", entry.decl)?;
        writeln!(out)?;
    }
    Ok(())
}
