/* ************************************************************************ **
** This file is part of rsp2, and is licensed under EITHER the MIT license  **
** or the Apache 2.0 license, at your option.                               **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
**                                                                          **
** Be aware that not all of rsp2 is provided under this permissive license, **
** and that the project as a whole is licensed under the GPL 3.0.           **
** ************************************************************************ */

use crate::V3;

#[inline(always)]
pub(crate) fn sub(a: V3, b: V3) -> V3
{ [a[0] - b[0], a[1] - b[1], a[2] - b[2]] }

#[inline(always)]
pub(crate) fn add(a: V3, b: V3) -> V3
{ [a[0] + b[0], a[1] + b[1], a[2] + b[2]] }

#[inline(always)]
pub(crate) fn scale(s: f64, a: V3) -> V3
{ [s * a[0], s * a[1], s * a[2]] }

#[inline(always)]
pub(crate) fn dot(a: V3, b: V3) -> f64
{ a[0] * b[0] + a[1] * b[1] + a[2] * b[2] }

#[inline(always)]
pub(crate) fn sqnorm(a: V3) -> f64
{ dot(a, a) }
