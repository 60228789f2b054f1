use std::cell::UnsafeCell;

/// Interior mutability without locking.
///
/// Render state is written by exactly one thread at a time (the render thread
/// while a block runs, or the owner while no driver is running), so callers get
/// a plain `&mut T` back. Nothing here enforces that; callers must not keep a
/// borrow alive across a call that may re-enter the same cell.
#[derive(Debug, Default)]
pub struct UnsafeMutex<T> {
    data: UnsafeCell<T>,
}

impl<T> UnsafeMutex<T> {
    pub const fn new(data: T) -> Self {
        UnsafeMutex {
            data: UnsafeCell::new(data),
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn lock(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn replace(&self, value: T) -> T {
        std::mem::replace(self.lock(), value)
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Copy> UnsafeMutex<T> {
    pub fn get(&self) -> T {
        *self.lock()
    }

    pub fn set(&self, value: T) {
        *self.lock() = value;
    }
}

unsafe impl<T: Send> Send for UnsafeMutex<T> {}
unsafe impl<T: Send> Sync for UnsafeMutex<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_returns_previous_value() {
        let cell = UnsafeMutex::new(vec![1, 2]);
        let old = cell.replace(vec![3]);
        assert_eq!(old, vec![1, 2]);
        assert_eq!(cell.into_inner(), vec![3]);
    }

    #[test]
    fn test_copy_accessors() {
        let cell = UnsafeMutex::new(7_i64);
        cell.set(cell.get() + 1);
        assert_eq!(cell.get(), 8);
    }
}
