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

//! Saving attachments from a mailbox to local storage.

pub mod attachment;
pub mod retrieve;

#[cfg(test)]
pub mod test_support {
    /// Build a `multipart/mixed` message with the given `Date` header (if
    /// any) and one base64-encoded attachment part per entry of
    /// `attachments`, whose first element is the raw `filename` parameter.
    pub fn message_with_attachments(
        date: Option<&str>,
        attachments: &[(&str, &[u8])],
    ) -> Vec<u8> {
        let mut message = String::new();
        message.push_str("From: sender@example.com\r\n");
        if let Some(date) = date {
            message.push_str(&format!("Date: {}\r\n", date));
        }
        message.push_str(
            "MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"=-=-=\"\r\n\
             \r\n\
             --=-=-=\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             See attached.\r\n",
        );

        for &(filename, content) in attachments {
            message.push_str(&format!(
                "--=-=-=\r\n\
                 Content-Type: application/octet-stream\r\n\
                 Content-Disposition: attachment; filename=\"{}\"\r\n\
                 Content-Transfer-Encoding: base64\r\n\
                 \r\n\
                 {}\r\n",
                filename,
                base64::encode(content)
            ));
        }

        message.push_str("--=-=-=--\r\n");
        message.into_bytes()
    }
}
