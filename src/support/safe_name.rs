//-
// Copyright (c) 2024, The Miltonmail developers
//
// This file is part of Miltonmail.
//
// Miltonmail is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Miltonmail is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Miltonmail. If not, see <http://www.gnu.org/licenses/>.

/// Determine whether the given name is "safe" to use as a single directory
/// name.
///
/// Account names become directories under the download root, so this excludes
/// empty names and patterns that cause directory traversal or hidden files,
/// as well as control characters.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() &&
        // Block directory traversal through .. and creation of hidden files on
        // UNIX
        name.chars().next() != Some('.') &&
        name.find('/').is_none() &&
        // Only a path separator on Windows, but always block since it has high
        // potential of causing problems
        name.find('\\').is_none() &&
        name.find(|c| c < ' ' || c == '\x7F').is_none()
}

/// Reduce `name` to a portable file name.
///
/// Spaces become underscores and every character outside `[A-Za-z0-9_.-]` is
/// dropped. The result may be empty.
pub fn sanitise_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if ' ' == c { '_' } else { c })
        .filter(|&c| c.is_ascii_alphanumeric() || "_.-".contains(c))
        .collect()
}
