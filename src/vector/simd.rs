//! Dot-product kernel. On x86_64 with AVX2+FMA the hot loop runs two
//! fused-multiply-add accumulators over 16 lanes per iteration; everything
//! else (and the tail) goes through the scalar path.

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "x86_64")]
    {
        if a.len() >= 16
            && std::is_x86_feature_detected!("avx2")
            && std::is_x86_feature_detected!("fma")
        {
            return unsafe { dot_fma(a, b) };
        }
    }
    dot_scalar(a, b)
}

#[inline]
pub fn norm_sq(v: &[f32]) -> f32 {
    dot(v, v)
}

#[inline]
fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn dot_fma(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let blocks = a.len() / 16;
    let mut acc_lo = _mm256_setzero_ps();
    let mut acc_hi = _mm256_setzero_ps();
    for block in 0..blocks {
        let at = a.as_ptr().add(block * 16);
        let bt = b.as_ptr().add(block * 16);
        acc_lo = _mm256_fmadd_ps(_mm256_loadu_ps(at), _mm256_loadu_ps(bt), acc_lo);
        acc_hi = _mm256_fmadd_ps(_mm256_loadu_ps(at.add(8)), _mm256_loadu_ps(bt.add(8)), acc_hi);
    }

    // Reduce 8 lanes to 1 without a round-trip through memory.
    let folded = _mm256_add_ps(acc_lo, acc_hi);
    let quad = _mm_add_ps(
        _mm256_castps256_ps128(folded),
        _mm256_extractf128_ps(folded, 1),
    );
    let pair = _mm_hadd_ps(quad, quad);
    let head = _mm_cvtss_f32(_mm_hadd_ps(pair, pair));

    head + dot_scalar(&a[blocks * 16..], &b[blocks * 16..])
}
