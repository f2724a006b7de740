use num_traits::Float;

/// Dot product of two equal-length slices.
pub fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}

/// Index-mapped dot product `Σ a[i] * b[map[i]]`.
pub fn dot_mapped<T: Float>(a: &[T], b: &[T], map: &[usize]) -> T {
    debug_assert_eq!(a.len(), map.len());
    a.iter()
        .zip(map.iter())
        .fold(T::zero(), |acc, (&x, &k)| acc + x * b[k])
}

pub fn fill_zero<T: Float>(a: &mut [T]) {
    for x in a.iter_mut() {
        *x = T::zero();
    }
}

/// `a *= d`
pub fn scale<T: Float>(a: &mut [T], d: T) {
    for x in a.iter_mut() {
        *x = *x * d;
    }
}

pub fn copy<T: Float>(src: &[T], dst: &mut [T]) {
    debug_assert_eq!(src.len(), dst.len());
    dst.copy_from_slice(src);
}

/// `dst = -src`
pub fn neg_copy<T: Float>(src: &[T], dst: &mut [T]) {
    debug_assert_eq!(src.len(), dst.len());
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d = -s;
    }
}

/// Scaled accumulate `a += d * tau`.
pub fn axpy<T: Float>(a: &mut [T], d: &[T], tau: T) {
    debug_assert_eq!(a.len(), d.len());
    for (x, &y) in a.iter_mut().zip(d.iter()) {
        *x = *x + y * tau;
    }
}

/// Gather `b[i] = a[map[i]]`.
pub fn pack<T: Float>(a: &[T], b: &mut [T], map: &[usize]) {
    debug_assert_eq!(b.len(), map.len());
    for (dst, &k) in b.iter_mut().zip(map.iter()) {
        *dst = a[k];
    }
}

/// Scatter `b[map[i]] = a[i]`, or `-a[i]` when `negate` is set.
pub fn unpack<T: Float>(a: &[T], b: &mut [T], map: &[usize], negate: bool) {
    debug_assert_eq!(a.len(), map.len());
    for (&x, &k) in a.iter().zip(map.iter()) {
        b[k] = if negate { -x } else { x };
    }
}

pub fn norm<T: Float>(a: &[T]) -> T {
    dot(a, a).sqrt()
}

/// Largest absolute entry, zero for an empty slice.
pub fn max_abs<T: Float>(a: &[T]) -> T {
    a.iter().fold(T::zero(), |acc, &x| acc.max(x.abs()))
}
