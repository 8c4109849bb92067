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

pub mod client;
pub mod mailbox_name;
pub mod session;
pub mod syntax;

#[cfg(test)]
pub mod test_support {
    use std::cell::RefCell;
    use std::io::{self, Read, Write};
    use std::rc::Rc;

    /// A duplex stream which plays back a fixed server script and records
    /// everything the client sends.
    pub struct ScriptedStream {
        input: io::Cursor<Vec<u8>>,
        output: Rc<RefCell<Vec<u8>>>,
    }

    impl ScriptedStream {
        pub fn new(script: &[u8]) -> (Self, Rc<RefCell<Vec<u8>>>) {
            let output = Rc::new(RefCell::new(Vec::new()));
            (
                ScriptedStream {
                    input: io::Cursor::new(script.to_vec()),
                    output: Rc::clone(&output),
                },
                output,
            )
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
            self.input.read(dst)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, src: &[u8]) -> io::Result<usize> {
            self.output.borrow_mut().extend_from_slice(src);
            Ok(src.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
