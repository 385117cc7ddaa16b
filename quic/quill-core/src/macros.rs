// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Checks that the condition holds, otherwise returns early
///
/// ```ignore
/// fn poll(&mut self) {
///     ensure!(self.is_armed());
///     // ...
/// }
///
/// fn budget(&self) -> usize {
///     ensure!(self.validated, 0);
///     // ...
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr) => {
        $crate::ensure!($cond, ());
    };
    ($cond:expr, $otherwise:expr) => {
        if !($cond) {
            return $otherwise;
        }
    };
}
