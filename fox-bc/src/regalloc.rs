use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use fox_ast::DeclId;

/// Register numbers are encoded in 8 bits.
pub const NUM_REGISTERS: u16 = 256;

#[derive(Default)]
struct AllocState {
    /// One past the highest live register number.
    high_water_mark: u16,
    /// Freed registers below the high-water mark.
    free: BTreeSet<u16>,
    /// Highest value the high-water mark ever reached.
    peak: u16,
    /// Register currently holding each local binding.
    vars: HashMap<DeclId, u16>,
    /// Set when more registers were requested than the format can address.
    overflowed: bool,
}

impl AllocState {
    /// Pulls the top of the free set back into the high-water mark while the
    /// two touch, keeping allocations dense.
    fn compact(&mut self) {
        while let Some(&top) = self.free.last() {
            if top + 1 != self.high_water_mark {
                return;
            }
            self.free.remove(&top);
            self.high_water_mark -= 1;
        }
    }

    fn raw_allocate(&mut self) -> u16 {
        self.compact();
        if let Some(&smallest) = self.free.first() {
            self.free.remove(&smallest);
            return smallest;
        }
        if self.high_water_mark >= NUM_REGISTERS {
            self.overflowed = true;
            return NUM_REGISTERS - 1;
        }
        let reg = self.high_water_mark;
        self.high_water_mark += 1;
        self.peak = self.peak.max(self.high_water_mark);
        reg
    }

    fn mark_freed(&mut self, reg: u16) {
        if self.overflowed {
            return;
        }
        if reg + 1 == self.high_water_mark {
            self.high_water_mark -= 1;
        } else {
            debug_assert!(self.high_water_mark > reg, "register freed twice");
            let inserted = self.free.insert(reg);
            debug_assert!(inserted, "register freed twice");
        }
    }
}

/// Hands out virtual registers for one function. Ownership is expressed
/// through [`RegisterValue`] handles: dropping an owning handle frees its
/// register, which is what ties register lifetime to expression scope.
pub struct RegisterAllocator {
    state: RefCell<AllocState>,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(AllocState::default()),
        }
    }

    /// A scratch register, freed when the handle drops.
    pub fn allocate_temporary(&self) -> RegisterValue<'_> {
        let num = self.state.borrow_mut().raw_allocate();
        RegisterValue {
            alloc: self,
            num,
            owning: true,
            bound: None,
        }
    }

    /// Allocates a register and binds it to a local declaration. The handle
    /// keeps the binding alive; dropping it (when the binding leaves scope)
    /// frees the register.
    pub fn bind_decl(&self, decl: DeclId) -> RegisterValue<'_> {
        let num = {
            let mut state = self.state.borrow_mut();
            let num = state.raw_allocate();
            let previous = state.vars.insert(decl, num);
            debug_assert!(previous.is_none(), "declaration bound twice");
            num
        };
        RegisterValue {
            alloc: self,
            num,
            owning: true,
            bound: Some(decl),
        }
    }

    /// A non-owning view of the register a binding lives in.
    pub fn use_decl(&self, decl: DeclId) -> RegisterValue<'_> {
        let num = *self
            .state
            .borrow()
            .vars
            .get(&decl)
            .expect("declaration has no bound register");
        RegisterValue {
            alloc: self,
            num,
            owning: false,
            bound: None,
        }
    }

    /// Reserves `count` consecutive registers: the call instruction reads its
    /// callee from a base register and assumes the arguments follow it.
    pub fn allocate_call_registers(&self, count: usize) -> Vec<RegisterValue<'_>> {
        let start = {
            let mut state = self.state.borrow_mut();
            state.compact();
            let available = |state: &AllocState, reg: u16| {
                reg >= state.high_water_mark || state.free.contains(&reg)
            };
            let start = (count <= NUM_REGISTERS as usize)
                .then(|| {
                    (0..=NUM_REGISTERS - count as u16).find(|&start| {
                        (start..start + count as u16).all(|r| available(&state, r))
                    })
                })
                .flatten();
            match start {
                Some(start) => {
                    for reg in start..start + count as u16 {
                        state.free.remove(&reg);
                    }
                    state.high_water_mark = state.high_water_mark.max(start + count as u16);
                    state.peak = state.peak.max(state.high_water_mark);
                    start
                }
                None => {
                    state.overflowed = true;
                    0
                }
            }
        };
        (start..start + count as u16)
            .map(|num| RegisterValue {
                alloc: self,
                num,
                owning: !self.state.borrow().overflowed,
                bound: None,
            })
            .collect()
    }

    /// Highest number of registers that were ever live at once.
    pub fn peak(&self) -> u16 {
        self.state.borrow().peak
    }

    /// Number of registers live right now. Used by tests to verify that
    /// expression generation does not leak registers.
    pub fn live_count(&self) -> u16 {
        let state = self.state.borrow();
        state.high_water_mark - state.free.len() as u16
    }

    pub fn overflowed(&self) -> bool {
        self.state.borrow().overflowed
    }

    fn release(&self, num: u16, bound: Option<DeclId>) {
        let mut state = self.state.borrow_mut();
        if let Some(decl) = bound {
            state.vars.remove(&decl);
        }
        state.mark_freed(num);
    }
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Move-only ownership token for one register. An owning handle frees the
/// register on drop; non-owning views (from [`RegisterAllocator::use_decl`])
/// leave it alone.
pub struct RegisterValue<'a> {
    alloc: &'a RegisterAllocator,
    num: u16,
    owning: bool,
    bound: Option<DeclId>,
}

impl RegisterValue<'_> {
    pub fn address(&self) -> u8 {
        self.num.min(u8::MAX as u16) as u8
    }

    /// Whether the register can be reused as a destination once this handle
    /// would be dropped: owned scratch space, not a variable's home.
    pub fn can_recycle(&self) -> bool {
        self.owning && self.bound.is_none()
    }
}

impl Drop for RegisterValue<'_> {
    fn drop(&mut self) {
        if self.owning {
            self.alloc.release(self.num, self.bound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_registers_are_reused_smallest_first() {
        let alloc = RegisterAllocator::new();
        let r0 = alloc.allocate_temporary();
        let r1 = alloc.allocate_temporary();
        let r2 = alloc.allocate_temporary();
        assert_eq!((r0.address(), r1.address(), r2.address()), (0, 1, 2));

        drop(r1);
        let again = alloc.allocate_temporary();
        assert_eq!(again.address(), 1);
        drop(again);
        drop(r0);
        drop(r2);
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn high_water_mark_compacts_on_free() {
        let alloc = RegisterAllocator::new();
        let r0 = alloc.allocate_temporary();
        let r1 = alloc.allocate_temporary();
        let r2 = alloc.allocate_temporary();
        // Free out of order: 1 goes to the free set, then freeing 2 lets the
        // mark fall back over both.
        drop(r1);
        drop(r2);
        let next = alloc.allocate_temporary();
        assert_eq!(next.address(), 1);
        drop(next);
        drop(r0);
        assert_eq!(alloc.live_count(), 0);
        assert_eq!(alloc.peak(), 3);
    }

    #[test]
    fn call_registers_are_consecutive() {
        let alloc = RegisterAllocator::new();
        let r0 = alloc.allocate_temporary();
        let r1 = alloc.allocate_temporary();
        drop(r0);
        // A block of three cannot use the hole at 0.
        let call = alloc.allocate_call_registers(3);
        let addrs: Vec<u8> = call.iter().map(|r| r.address()).collect();
        assert_eq!(addrs, vec![2, 3, 4]);
        drop(call);
        drop(r1);
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn decl_bindings_release_on_scope_exit() {
        use fox_ast::{AstContext, DeclKind, TypeLoc};
        use fox_common::SourceRange;

        let alloc = RegisterAllocator::new();
        // The allocator treats the id as an opaque key.
        let mut ctx = AstContext::new();
        let name = ctx.ident("x");
        let type_loc = TypeLoc {
            ty: ctx.int_type(),
            range: SourceRange::invalid(),
        };
        let decl = ctx.alloc_decl(
            DeclKind::Var {
                name,
                name_range: SourceRange::invalid(),
                type_loc,
                init: None,
                is_const: false,
                global: false,
            },
            SourceRange::invalid(),
        );
        let binding = alloc.bind_decl(decl);
        assert_eq!(binding.address(), 0);
        {
            let view = alloc.use_decl(decl);
            assert_eq!(view.address(), 0);
            assert!(!view.can_recycle());
            // dropping the view must not free the register
        }
        assert_eq!(alloc.live_count(), 1);
        drop(binding);
        assert_eq!(alloc.live_count(), 0);
    }
}
