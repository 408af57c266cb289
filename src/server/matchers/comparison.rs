use regex::Regex;
use stringmetrics::LevWeights;

pub fn string_equals(case_sensitive: bool, expected: &str, actual: &str) -> bool {
    if case_sensitive {
        expected == actual
    } else {
        expected.to_lowercase() == actual.to_lowercase()
    }
}

pub fn string_contains(case_sensitive: bool, expected: &str, actual: &str) -> bool {
    if case_sensitive {
        actual.contains(expected)
    } else {
        actual.to_lowercase().contains(&expected.to_lowercase())
    }
}

/// Levenshtein distance between two strings, normalized by the longer string's length.
pub fn string_distance(case_sensitive: bool, expected: &str, actual: &str) -> f64 {
    let (expected, actual) = fold_case(case_sensitive, expected, actual);

    let expected: Vec<char> = expected.chars().collect();
    let actual: Vec<char> = actual.chars().collect();

    normalize(
        equal_weight_distance_for(&expected, &actual),
        expected.len().max(actual.len()),
    )
}

/// How far `actual` is from containing `expected`: the share of the longer string that is not
/// covered by their longest common substring.
pub fn distance_for_substring(case_sensitive: bool, expected: &str, actual: &str) -> f64 {
    let max_len = expected.chars().count().max(actual.chars().count());
    let lcs_length = longest_common_substring(case_sensitive, expected, actual);

    normalize(max_len - lcs_length.min(max_len), max_len)
}

/// Share of `expected` that does appear in `actual`. Used for the negated substring operators.
pub fn similarity_for_substring(case_sensitive: bool, expected: &str, actual: &str) -> f64 {
    let expected_len = expected.chars().count();
    if expected_len == 0 {
        return 1.0;
    }

    longest_common_substring(case_sensitive, expected, actual) as f64 / expected_len as f64
}

pub fn longest_common_substring(case_sensitive: bool, s1: &str, s2: &str) -> usize {
    let (s1, s2) = fold_case(case_sensitive, s1, s2);

    let (long_s, short_s): (Vec<char>, Vec<char>) = if s1.chars().count() < s2.chars().count() {
        (s2.chars().collect(), s1.chars().collect())
    } else {
        (s1.chars().collect(), s2.chars().collect())
    };

    let mut previous = vec![0; short_s.len() + 1];
    let mut current = vec![0; short_s.len() + 1];
    let mut longest = 0;

    for long_char in long_s.iter() {
        for (j, short_char) in short_s.iter().enumerate() {
            if long_char == short_char {
                current[j + 1] = previous[j] + 1;
                if current[j + 1] > longest {
                    longest = current[j + 1];
                }
            } else {
                current[j + 1] = 0;
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }

    longest
}

/// Normalized Levenshtein distance over raw bytes.
pub fn bytes_distance(expected: &[u8], actual: &[u8]) -> f64 {
    normalize(
        equal_weight_distance_for(expected, actual),
        expected.len().max(actual.len()),
    )
}

pub fn equal_weight_distance_for<T>(expected: &[T], actual: &[T]) -> usize
where
    T: PartialEq + Sized,
{
    stringmetrics::try_levenshtein_weight_iter(
        expected.iter(),
        actual.iter(),
        u32::MAX,
        &LevWeights {
            insertion: 1,
            deletion: 1,
            substitution: 1,
        },
    )
    .map_or(expected.len().max(actual.len()), |d| d as usize)
}

/// Number of bytes in `text` not covered by any match of `re`.
pub fn regex_unmatched_length(text: &str, re: &Regex) -> usize {
    let mut last_end = 0;
    let mut total_unmatched_length = 0;

    for mat in re.find_iter(text) {
        if last_end != mat.start() {
            total_unmatched_length += mat.start() - last_end;
        }
        last_end = mat.end();
    }

    if last_end < text.len() {
        total_unmatched_length += text.len() - last_end;
    }

    total_unmatched_length
}

pub fn normalize(distance: usize, max_len: usize) -> f64 {
    if max_len == 0 {
        return 0.0;
    }

    (distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

fn fold_case(case_sensitive: bool, a: &str, b: &str) -> (String, String) {
    if case_sensitive {
        (a.to_string(), b.to_string())
    } else {
        (a.to_lowercase(), b.to_lowercase())
    }
}

#[cfg(test)]
mod string_distance_tests {
    use super::*;

    #[test]
    fn test_string_distance_case_sensitive() {
        assert_eq!(string_distance(true, "Hello", "Hello"), 0.0);
        assert_eq!(string_distance(true, "Hello", "hello"), 0.2);
        assert_eq!(string_distance(true, "abc", "xyz"), 1.0);
    }

    #[test]
    fn test_string_distance_case_insensitive() {
        assert_eq!(string_distance(false, "Hello", "hELLO"), 0.0);
    }

    #[test]
    fn test_string_distance_empty_strings() {
        assert_eq!(string_distance(true, "", ""), 0.0);
        assert_eq!(string_distance(true, "abc", ""), 1.0);
    }

    #[test]
    fn test_longer_path_is_partially_similar() {
        let d = string_distance(true, "/foo", "/foo/extra");
        assert!(d > 0.0 && d < 1.0);
    }
}
